use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    backoff::ReconnectPolicy,
    commands::CommandSet,
    cooldown::DEFAULT_COOLDOWN_WINDOW,
    errors::Error,
    messaging::{throttled::ThrottleConfig, types::OutboundPayload},
    Result,
};

/// Typed configuration, read from the environment (and an optional `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Transport bridge
    pub bridge_program: PathBuf,
    pub bridge_args: Vec<String>,
    pub auth_dir: PathBuf,

    // Persistence
    pub links_file: PathBuf,

    // Dispatch
    pub greeting: OutboundPayload,
    pub cooldown_window: Duration,
    pub send_timeout: Duration,
    pub commands: CommandSet,

    // Session
    pub reconnect: ReconnectPolicy,

    // Outbound pacing
    pub throttle: ThrottleConfig,

    // Broadcast
    pub broadcast_on_open: bool,

    // Audit
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let (bridge_program, bridge_args) =
            parse_command(&env_str("BRIDGE_COMMAND").unwrap_or("node bridge.mjs".to_string()))?;
        let auth_dir = env_path("AUTH_DIR").unwrap_or_else(|| PathBuf::from("auth_info"));

        let links_file =
            env_path("LINKS_FILE").unwrap_or_else(|| PathBuf::from("collected_links.json"));

        let greeting_file =
            env_path("GREETING_FILE").unwrap_or_else(|| PathBuf::from("greeting.txt"));
        let greeting = load_greeting(&greeting_file)?;

        let cooldown_window = env_u64("COOLDOWN_SECS")
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_COOLDOWN_WINDOW);
        let send_timeout = Duration::from_millis(env_u64("SEND_TIMEOUT_MS").unwrap_or(30_000));
        let commands = CommandSet {
            links: env_bool("ENABLE_LINKS_COMMAND").unwrap_or(true),
            clear_links: env_bool("ENABLE_CLEAR_LINKS_COMMAND").unwrap_or(true),
        };

        let defaults = ReconnectPolicy::default();
        let reconnect = ReconnectPolicy {
            base_delay: env_u64("RECONNECT_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: env_u64("RECONNECT_MAX_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            jitter_factor: env_f64("RECONNECT_JITTER")
                .unwrap_or(defaults.jitter_factor)
                .clamp(0.0, 1.0),
            max_consecutive_failures: env_u32("RECONNECT_MAX_FAILURES").filter(|n| *n > 0),
        };

        let throttle_defaults = ThrottleConfig::default();
        let throttle = ThrottleConfig {
            global_min_interval: env_u64("THROTTLE_GLOBAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(throttle_defaults.global_min_interval),
            per_recipient_min_interval: env_u64("THROTTLE_PER_RECIPIENT_MS")
                .map(Duration::from_millis)
                .unwrap_or(throttle_defaults.per_recipient_min_interval),
        };

        let broadcast_on_open = env_bool("BROADCAST_ON_OPEN").unwrap_or(false);

        let audit_log_path = env_path("AUDIT_LOG_PATH")
            .unwrap_or_else(|| PathBuf::from("wab-audit.log"));
        let audit_log_json = env_bool("AUDIT_LOG_JSON").unwrap_or(true);

        Ok(Self {
            bridge_program,
            bridge_args,
            auth_dir,
            links_file,
            greeting,
            cooldown_window,
            send_timeout,
            commands,
            reconnect,
            throttle,
            broadcast_on_open,
            audit_log_path,
            audit_log_json,
        })
    }
}

fn load_greeting(path: &Path) -> Result<OutboundPayload> {
    let txt = fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "greeting payload {} could not be read: {e} (set GREETING_FILE)",
            path.display()
        ))
    })?;
    let payload = OutboundPayload::parse(&txt);
    if payload.is_empty() {
        return Err(Error::Config(format!(
            "greeting payload {} is empty",
            path.display()
        )));
    }
    Ok(payload)
}

fn parse_command(raw: &str) -> Result<(PathBuf, Vec<String>)> {
    let mut words = raw.split_whitespace().map(|s| s.to_string());
    let Some(program) = words.next() else {
        return Err(Error::Config(
            "BRIDGE_COMMAND must name a program".to_string(),
        ));
    };
    Ok((PathBuf::from(program), words.collect()))
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| parse_bool(&s))
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_f64(key: &str) -> Option<f64> {
    env_str(key).and_then(|s| s.trim().parse::<f64>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}
