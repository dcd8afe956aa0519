use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub port: u16,
    pub log_level: String,
    pub store_path: String,
    pub static_dir: String,
    pub routes_path: String,
    pub stops_path: String,
    pub stream_buffer: usize,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("port", 5000)?
            .set_default("log_level", "info")?
            .set_default("store_path", "data/locations.csv")?
            .set_default("static_dir", "static")?
            .set_default("routes_path", "data/routes.json")?
            .set_default("stops_path", "data/stops.csv")?
            .set_default("stream_buffer", 256)?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn is_test(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("test")
    }
}
