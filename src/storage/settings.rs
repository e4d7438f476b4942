//! Persisted hub settings with typed access.
//!
//! New settings are added to [`default_settings`]; [`initialize_settings`]
//! inserts the ones missing from storage and leaves existing values alone.

use tracing::debug;

use super::backend::Storage;
use super::error::{StorageError, StorageResult};
use crate::model::{Setting, SettingValue};

/// Interval of the Kea lease statistics puller, in seconds
pub const KEA_STATS_PULLER_INTERVAL: &str = "kea_stats_puller_interval";

/// Interval of the Kea host reservations puller, in seconds
pub const KEA_HOSTS_PULLER_INTERVAL: &str = "kea_hosts_puller_interval";

pub fn default_settings() -> Vec<Setting> {
    vec![
        Setting {
            name: KEA_STATS_PULLER_INTERVAL.to_string(),
            value: SettingValue::Int(60),
        },
        Setting {
            name: KEA_HOSTS_PULLER_INTERVAL.to_string(),
            value: SettingValue::Int(60),
        },
    ]
}

/// Add default settings that are not stored yet
pub async fn initialize_settings(storage: &dyn Storage) -> StorageResult<()> {
    let present = storage.list_settings().await?;

    for default in default_settings() {
        if present.iter().any(|s| s.name == default.name) {
            continue;
        }
        debug!("initializing setting {}", default.name);
        storage.set_setting(default).await?;
    }
    Ok(())
}

async fn get_required(storage: &dyn Storage, name: &str) -> StorageResult<Setting> {
    storage
        .get_setting(name)
        .await?
        .ok_or_else(|| StorageError::NotFound(format!("setting {name} is missing")))
}

fn mismatch(name: &str, expected: &'static str, found: &SettingValue) -> StorageError {
    StorageError::SettingTypeMismatch {
        name: name.to_string(),
        expected,
        found: found.type_name(),
    }
}

pub async fn get_setting_int(storage: &dyn Storage, name: &str) -> StorageResult<i64> {
    match get_required(storage, name).await?.value {
        SettingValue::Int(v) => Ok(v),
        other => Err(mismatch(name, "int", &other)),
    }
}

pub async fn get_setting_bool(storage: &dyn Storage, name: &str) -> StorageResult<bool> {
    match get_required(storage, name).await?.value {
        SettingValue::Bool(v) => Ok(v),
        other => Err(mismatch(name, "bool", &other)),
    }
}

pub async fn get_setting_str(storage: &dyn Storage, name: &str) -> StorageResult<String> {
    match get_required(storage, name).await?.value {
        SettingValue::Str(v) => Ok(v),
        other => Err(mismatch(name, "str", &other)),
    }
}

pub async fn get_setting_passwd(storage: &dyn Storage, name: &str) -> StorageResult<String> {
    match get_required(storage, name).await?.value {
        SettingValue::Passwd(v) => Ok(v),
        other => Err(mismatch(name, "passwd", &other)),
    }
}
