use std::env;

/// Boot-time configuration. `session_secret` and `live_token` are required —
/// their absence aborts startup (spec: "absent ⇒ abort") rather than falling
/// back to a dev default, since both gate real authorization decisions.
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub session_secret: String,
    pub live_token: String,
    pub server_host: String,
    pub server_port: u16,
    pub is_production: bool,
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();

        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;
        let session_secret = env::var("SESSION_SECRET")
            .map_err(|_| "SESSION_SECRET must be set".to_string())?;
        let live_token = env::var("AUDIX_LIVE_TOKEN")
            .map_err(|_| "AUDIX_LIVE_TOKEN must be set".to_string())?;

        let is_production = env::var("NODE_ENV").as_deref() == Ok("production");

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();

        Ok(Config {
            database_url,
            session_secret,
            live_token,
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("PORT")
                .unwrap_or_else(|_| "5005".to_string())
                .parse()
                .unwrap_or(5005),
            is_production,
            allowed_origins,
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_addr_combines_host_and_port() {
        let config = Config {
            database_url: String::new(),
            session_secret: String::new(),
            live_token: String::new(),
            server_host: "127.0.0.1".into(),
            server_port: 5005,
            is_production: false,
            allowed_origins: vec![],
        };
        assert_eq!(config.server_addr(), "127.0.0.1:5005");
    }
}
