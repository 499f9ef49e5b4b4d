use secrecy::SecretBox;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub database_url: SecretBox<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
    /// CORS 許可オリジン（未設定なら CORS レイヤーを付与しない）
    #[serde(default)]
    pub cors_allowed_origin: Option<String>,

    // マジックリンク設定
    /// リンクに埋め込むベースURL（`{APP_BASE_URL}/auth/verify?token=`）
    ///
    /// 既定値はこのサービス自身。フロントエンドを別オリジンで配信する場合は
    /// そのURLを指定し、フロントエンドが `/api/auth/verify` に転送する。
    #[serde(default = "default_app_base_url")]
    pub app_base_url: String,
    #[serde(default = "default_magic_link_ttl_secs")]
    pub magic_link_ttl_secs: i64,
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: i64,
    #[serde(default = "default_token_sweep_interval_secs")]
    pub token_sweep_interval_secs: u64,
    /// ローカル開発用: レスポンスに平文トークンを含める
    #[serde(default)]
    pub dev_expose_magic_token: bool,
    /// 起動時に admin ロールで登録されるブートストラップ用アカウント
    #[serde(default)]
    pub superuser_email: Option<String>,

    // SMTP設定（オプション - email機能有効時のみ使用）
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<SecretBox<String>>,
    pub smtp_password: Option<SecretBox<String>>,
    #[serde(default)]
    pub smtp_from_address: Option<String>,
    #[serde(default = "default_external_timeout_secs")]
    pub mailer_timeout_secs: u64,

    // 電子税金計算書サービス設定
    pub fiscal_api_url: String,
    pub fiscal_api_key: SecretBox<String>,
    /// 発行者の事業者登録番号（10桁）
    pub fiscal_corp_num: String,
    #[serde(default = "default_external_timeout_secs")]
    pub fiscal_timeout_secs: u64,
}

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_APP_BASE_URL: &str = "http://localhost:3000";
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_MAGIC_LINK_TTL_SECS: i64 = 15 * 60;
const DEFAULT_SESSION_TTL_SECS: i64 = 8 * 60 * 60;
const DEFAULT_TOKEN_SWEEP_INTERVAL_SECS: u64 = 60 * 60;
const DEFAULT_EXTERNAL_TIMEOUT_SECS: u64 = 30;

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_run_migrations() -> bool {
    true
}

fn default_app_base_url() -> String {
    DEFAULT_APP_BASE_URL.to_string()
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

fn default_magic_link_ttl_secs() -> i64 {
    DEFAULT_MAGIC_LINK_TTL_SECS
}

fn default_session_ttl_secs() -> i64 {
    DEFAULT_SESSION_TTL_SECS
}

fn default_token_sweep_interval_secs() -> u64 {
    DEFAULT_TOKEN_SWEEP_INTERVAL_SECS
}

fn default_external_timeout_secs() -> u64 {
    DEFAULT_EXTERNAL_TIMEOUT_SECS
}

impl Config {
    pub fn load() -> Result<Self, envy::Error> {
        envy::from_env()
    }
}
