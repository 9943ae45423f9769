use serde::{Deserialize, Serialize};

/// Credential sharing policy for the pooled store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PoolMode {
    /// Users only ever see their own credentials.
    Private,
    /// Public tier-3 credentials are reachable by users who own at least one
    /// active tier-3 credential; public tier-2.5 credentials are open to all.
    #[default]
    Tier3Shared,
    /// Donors (users owning at least one public credential) may draw from the
    /// whole public pool.
    FullShared,
}

/// Pool, quota and rate-limit policy managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PolicyConfig {
    /// Sharing policy for pooled credentials.
    /// TOML: `policy.pool_mode`. Default: `tier3_shared`.
    #[serde(default)]
    pub pool_mode: PoolMode,

    /// Cooldown seconds per model group after a credential serves a request.
    /// TOML: `policy.cd_flash` / `policy.cd_pro` / `policy.cd_tier3`.
    #[serde(default = "default_cd_flash")]
    pub cd_flash: i64,
    #[serde(default = "default_cd_pro")]
    pub cd_pro: i64,
    #[serde(default = "default_cd_tier3")]
    pub cd_tier3: i64,

    /// Requests-per-minute ceiling for regular users and for donors.
    /// TOML: `policy.base_rpm` / `policy.contributor_rpm`.
    #[serde(default = "default_base_rpm")]
    pub base_rpm: i64,
    #[serde(default = "default_contributor_rpm")]
    pub contributor_rpm: i64,

    /// Daily per-class allowance granted per owned credential.
    /// TOML: `policy.flash_per_cred` / `policy.pro_per_cred` /
    /// `policy.tier3_per_cred`.
    #[serde(default = "default_flash_per_cred")]
    pub flash_per_cred: i64,
    #[serde(default = "default_pro_per_cred")]
    pub pro_per_cred: i64,
    #[serde(default = "default_tier3_per_cred")]
    pub tier3_per_cred: i64,

    /// Daily per-class allowance for users without any credential.
    /// TOML: `policy.no_cred_flash` / `policy.no_cred_pro`.
    #[serde(default = "default_no_cred_flash")]
    pub no_cred_flash: i64,
    #[serde(default = "default_no_cred_pro")]
    pub no_cred_pro: i64,

    /// Default total daily allowance for users created without an explicit
    /// `daily_quota` value.
    /// TOML: `policy.daily_quota`. Default: `1000`.
    #[serde(default = "default_daily_quota")]
    pub daily_quota: i64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            pool_mode: PoolMode::default(),
            cd_flash: default_cd_flash(),
            cd_pro: default_cd_pro(),
            cd_tier3: default_cd_tier3(),
            base_rpm: default_base_rpm(),
            contributor_rpm: default_contributor_rpm(),
            flash_per_cred: default_flash_per_cred(),
            pro_per_cred: default_pro_per_cred(),
            tier3_per_cred: default_tier3_per_cred(),
            no_cred_flash: default_no_cred_flash(),
            no_cred_pro: default_no_cred_pro(),
            daily_quota: default_daily_quota(),
        }
    }
}

fn default_cd_flash() -> i64 {
    10
}

fn default_cd_pro() -> i64 {
    30
}

fn default_cd_tier3() -> i64 {
    60
}

fn default_base_rpm() -> i64 {
    10
}

fn default_contributor_rpm() -> i64 {
    30
}

fn default_flash_per_cred() -> i64 {
    200
}

fn default_pro_per_cred() -> i64 {
    100
}

fn default_tier3_per_cred() -> i64 {
    100
}

fn default_no_cred_flash() -> i64 {
    20
}

fn default_no_cred_pro() -> i64 {
    5
}

fn default_daily_quota() -> i64 {
    1000
}
