use std::time::Duration;

use mongodb::{Client, Database, bson::doc, options::ClientOptions};
use tokio::time::sleep;
use tracing::warn;

use super::error::{MongoDaoError, MongoResult};

/// Backoff applied while the first ping of a fresh client keeps failing.
struct PingBackoff;

impl PingBackoff {
    const MAX_ATTEMPTS: u32 = 6;
    const FIRST: Duration = Duration::from_millis(250);
    const CEILING: Duration = Duration::from_secs(4);

    fn next(current: Duration) -> Duration {
        (current * 2).min(Self::CEILING)
    }
}

/// Build a client and wait until the database answers a ping.
pub async fn establish_connection(
    options: &ClientOptions,
    database_name: &str,
) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(database_name);

    let mut delay = PingBackoff::FIRST;
    let mut attempts = 0;
    loop {
        match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => return Ok((client, database)),
            Err(source) => {
                attempts += 1;
                if attempts >= PingBackoff::MAX_ATTEMPTS {
                    return Err(MongoDaoError::InitialPing { attempts, source });
                }
                warn!(attempts, database = database_name, error = %source, "MongoDB ping failed; retrying");
                sleep(delay).await;
                delay = PingBackoff::next(delay);
            }
        }
    }
}
