use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const DEFAULT_PER_MINUTE: u64 = 5;
pub const DEFAULT_PER_HOUR: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLimits {
    pub per_minute: u64,
    pub per_hour: u64,
}

impl Default for ChannelLimits {
    fn default() -> Self {
        Self {
            per_minute: DEFAULT_PER_MINUTE,
            per_hour: DEFAULT_PER_HOUR,
        }
    }
}

/// Operator-controlled switches, stored as a single row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub pause_all_publish: bool,
    pub autopilot_enabled: bool,
    /// `{"telegram": {"per_minute": 5, "per_hour": 100}}` or a global `{"per_minute": .., "per_hour": ..}`.
    pub rate_limits: Option<Value>,
    /// `{"make": false}` disables a channel.
    pub feature_flags: Option<Value>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pause_all_publish: false,
            autopilot_enabled: true,
            rate_limits: None,
            feature_flags: None,
            updated_at: None,
        }
    }
}

impl Settings {
    /// Per-channel entry wins, then the global keys, then the defaults.
    pub fn limits_for(&self, channel: &str) -> ChannelLimits {
        let Some(limits) = self.rate_limits.as_ref().and_then(Value::as_object) else {
            return ChannelLimits::default();
        };
        let source = match limits.get(channel).and_then(Value::as_object) {
            Some(per_channel) => per_channel,
            None => limits,
        };
        ChannelLimits {
            per_minute: read_limit(source.get("per_minute")).unwrap_or(DEFAULT_PER_MINUTE),
            per_hour: read_limit(source.get("per_hour")).unwrap_or(DEFAULT_PER_HOUR),
        }
    }

    pub fn channel_enabled(&self, channel: &str) -> bool {
        self.feature_flags
            .as_ref()
            .and_then(|flags| flags.get(channel))
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    pub fn set_pause(&mut self, paused: bool) {
        self.pause_all_publish = paused;
    }

    pub fn set_channel_limits(&mut self, channel: &str, limits: ChannelLimits) {
        let mut map = self
            .rate_limits
            .take()
            .and_then(|v| match v {
                Value::Object(m) => Some(m),
                _ => None,
            })
            .unwrap_or_default();
        map.insert(
            channel.to_string(),
            json!({"per_minute": limits.per_minute, "per_hour": limits.per_hour}),
        );
        self.rate_limits = Some(Value::Object(map));
    }

    pub fn set_feature_flag(&mut self, name: &str, enabled: bool) {
        let mut map = self
            .feature_flags
            .take()
            .and_then(|v| match v {
                Value::Object(m) => Some(m),
                _ => None,
            })
            .unwrap_or_default();
        map.insert(name.to_string(), Value::Bool(enabled));
        self.feature_flags = Some(Value::Object(map));
    }
}

fn read_limit(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
