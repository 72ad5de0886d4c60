use log::info;
use mongodb::{options::ClientOptions, Client, Database};

use crate::config::Config;

pub struct MongoDB {
    pub client: Client,
    pub db: Database,
}

impl MongoDB {
    /// Connects with the configured URI and selects the task database.
    pub async fn connect(config: &Config) -> mongodb::error::Result<Self> {
        let client_options = ClientOptions::parse(&config.mongo_uri).await?;
        let client = Client::with_options(client_options)?;
        let db = client.database(&config.database_name);
        info!("Connected to MongoDB database {}", config.database_name);
        Ok(MongoDB { client, db })
    }
}
