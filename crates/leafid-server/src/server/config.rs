use anyhow::{Context, bail};
use clap::{ArgAction, Parser};
use core::time::Duration;
use leafid::{TWITTER_EPOCH, segment::SegmentConfig, snowflake::MAX_WORKER_ID};
use std::{
    collections::HashSet,
    net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket},
    path::PathBuf,
};

/// Runtime configuration for the `leafid-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a `.env`
/// file is loaded first), with defaults suitable for a single standalone
/// instance.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "leafid-server",
    version,
    about = "An HTTP service for Segment and Snowflake-style distributed IDs"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// Application name. Scopes the coordinator namespace and the local
    /// worker id file.
    ///
    /// Environment variable: `LEAF_NAME`
    #[arg(long, env = "LEAF_NAME", default_value_t = String::from("leaf"))]
    pub leaf_name: String,

    /// Root directory of the local worker id files.
    ///
    /// Environment variable: `CONF_PATH`
    #[arg(long, env = "CONF_PATH", default_value = "conf")]
    pub conf_path: PathBuf,

    /// Serve segment mode. When disabled, segment requests answer id `0`.
    ///
    /// Environment variable: `SEGMENT_ENABLE`
    #[arg(long, env = "SEGMENT_ENABLE", default_value_t = true, action = ArgAction::Set)]
    pub segment_enable: bool,

    /// Seed rows for the in-memory allocation store, as `tag:max_id:step`.
    ///
    /// Example: "order_id:1:1000,user_id:1:2000"
    ///
    /// Environment variable: `SEGMENT_TAGS`
    #[arg(long, env = "SEGMENT_TAGS", value_delimiter = ',')]
    pub segment_tags: Vec<String>,

    /// Upper bound for dynamically grown steps.
    ///
    /// Environment variable: `SEGMENT_MAX_STEP`
    #[arg(long, env = "SEGMENT_MAX_STEP", default_value_t = 1_000_000)]
    pub segment_max_step: i64,

    /// Target time between two refills of the same tag, in milliseconds.
    ///
    /// Environment variable: `SEGMENT_DURATION_MS`
    #[arg(long, env = "SEGMENT_DURATION_MS", default_value_t = 900_000)]
    pub segment_duration_ms: u64,

    /// Period of the tag resync task, in seconds.
    ///
    /// Environment variable: `RESYNC_INTERVAL_SECS`
    #[arg(long, env = "RESYNC_INTERVAL_SECS", default_value_t = 60)]
    pub resync_interval_secs: u64,

    /// Serve Snowflake mode. When disabled, Snowflake requests answer id `0`.
    ///
    /// Environment variable: `SNOWFLAKE_ENABLE`
    #[arg(long, env = "SNOWFLAKE_ENABLE", default_value_t = true, action = ArgAction::Set)]
    pub snowflake_enable: bool,

    /// Lease the worker id from the coordinator instead of using
    /// `SNOWFLAKE_WORKER_ID`. The coordinator backend lives in this process,
    /// so it keeps ids unique only within a single instance.
    ///
    /// Environment variable: `SNOWFLAKE_ENABLE_COORDINATOR`
    #[arg(long, env = "SNOWFLAKE_ENABLE_COORDINATOR", default_value_t = false, action = ArgAction::Set)]
    pub snowflake_enable_coordinator: bool,

    /// Static worker id. Required unless the coordinator is enabled; every
    /// instance needs its own.
    ///
    /// Environment variable: `SNOWFLAKE_WORKER_ID`
    #[arg(long, env = "SNOWFLAKE_WORKER_ID")]
    pub snowflake_worker_id: Option<i64>,

    /// IP published to the coordinator. Discovered from the outbound
    /// interface when unset.
    ///
    /// Environment variable: `SNOWFLAKE_IP`
    #[arg(long, env = "SNOWFLAKE_IP")]
    pub snowflake_ip: Option<IpAddr>,

    /// Port published to the coordinator. Defaults to the listen port.
    ///
    /// Environment variable: `SNOWFLAKE_PORT`
    #[arg(long, env = "SNOWFLAKE_PORT")]
    pub snowflake_port: Option<u16>,

    /// Zero point of the Snowflake timestamp, in milliseconds since the Unix
    /// epoch.
    ///
    /// Environment variable: `SNOWFLAKE_EPOCH_MS`
    #[arg(long, env = "SNOWFLAKE_EPOCH_MS", default_value_t = TWITTER_EPOCH.as_millis() as u64)]
    pub snowflake_epoch_ms: u64,

    /// Period of the coordinator heartbeat, in seconds.
    ///
    /// Environment variable: `HEARTBEAT_INTERVAL_SECS`
    #[arg(long, env = "HEARTBEAT_INTERVAL_SECS", default_value_t = 3)]
    pub heartbeat_interval_secs: u64,
}

/// One row the in-memory allocation store starts with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedAllocation {
    pub tag: String,
    pub max_id: i64,
    pub step: i64,
}

impl core::str::FromStr for SeedAllocation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split(':');
        let (Some(tag), Some(max_id), Some(step), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            bail!("segment tag `{s}` must look like `tag:max_id:step`");
        };
        if tag.is_empty() {
            bail!("segment tag `{s}` has an empty name");
        }
        let max_id: i64 = max_id
            .parse()
            .with_context(|| format!("invalid max_id in segment tag `{s}`"))?;
        let step: i64 = step
            .parse()
            .with_context(|| format!("invalid step in segment tag `{s}`"))?;
        if max_id < 0 {
            bail!("segment tag `{s}` has a negative max_id");
        }
        if step <= 0 {
            bail!("segment tag `{s}` must have a positive step");
        }
        Ok(Self {
            tag: tag.to_owned(),
            max_id,
            step,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SegmentSettings {
    pub config: SegmentConfig,
    pub seeds: Vec<SeedAllocation>,
}

/// Where the Snowflake worker id comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerIdSource {
    Static(i64),
    Coordinated {
        ip: IpAddr,
        port: u16,
        heartbeat_interval: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct SnowflakeSettings {
    pub epoch: Duration,
    pub worker: WorkerIdSource,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: SocketAddr,
    pub app_name: String,
    pub conf_path: PathBuf,
    pub segment: Option<SegmentSettings>,
    pub snowflake: Option<SnowflakeSettings>,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let server_addr: SocketAddr = args
            .server_addr
            .parse()
            .with_context(|| format!("SERVER_ADDR `{}` is not a socket address", args.server_addr))?;

        if args.leaf_name.is_empty() || args.leaf_name.contains('/') {
            bail!("LEAF_NAME must be non-empty and must not contain `/`");
        }

        let segment = if args.segment_enable {
            Some(segment_settings(&args)?)
        } else {
            None
        };

        let snowflake = if args.snowflake_enable {
            Some(snowflake_settings(&args, server_addr.port())?)
        } else {
            None
        };

        Ok(Self {
            server_addr,
            app_name: args.leaf_name,
            conf_path: args.conf_path,
            segment,
            snowflake,
        })
    }
}

fn segment_settings(args: &CliArgs) -> anyhow::Result<SegmentSettings> {
    if args.segment_max_step <= 0 {
        bail!("SEGMENT_MAX_STEP must be greater than 0");
    }
    if args.segment_duration_ms == 0 {
        bail!("SEGMENT_DURATION_MS must be greater than 0");
    }
    if args.resync_interval_secs == 0 {
        bail!("RESYNC_INTERVAL_SECS must be greater than 0");
    }

    let seeds = args
        .segment_tags
        .iter()
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| raw.parse::<SeedAllocation>())
        .collect::<anyhow::Result<Vec<_>>>()?;
    let mut seen = HashSet::new();
    for seed in &seeds {
        if !seen.insert(seed.tag.as_str()) {
            bail!("segment tag `{}` is configured twice", seed.tag);
        }
    }

    Ok(SegmentSettings {
        config: SegmentConfig {
            max_step: args.segment_max_step,
            segment_duration: Duration::from_millis(args.segment_duration_ms),
            resync_interval: Duration::from_secs(args.resync_interval_secs),
            ..SegmentConfig::default()
        },
        seeds,
    })
}

fn snowflake_settings(args: &CliArgs, listen_port: u16) -> anyhow::Result<SnowflakeSettings> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    if i64::try_from(args.snowflake_epoch_ms).map_or(true, |epoch| epoch >= now_ms) {
        bail!(
            "SNOWFLAKE_EPOCH_MS ({}) must lie in the past (now = {})",
            args.snowflake_epoch_ms,
            now_ms
        );
    }

    let worker = match (args.snowflake_enable_coordinator, args.snowflake_worker_id) {
        (true, Some(_)) => {
            bail!("SNOWFLAKE_WORKER_ID cannot be combined with SNOWFLAKE_ENABLE_COORDINATOR")
        }
        (false, None) => {
            bail!("SNOWFLAKE_WORKER_ID is required unless SNOWFLAKE_ENABLE_COORDINATOR is set")
        }
        (false, Some(worker_id)) => {
            if !(0..=MAX_WORKER_ID).contains(&worker_id) {
                bail!(
                    "SNOWFLAKE_WORKER_ID ({}) exceeds the worker id space (max = {})",
                    worker_id,
                    MAX_WORKER_ID
                );
            }
            WorkerIdSource::Static(worker_id)
        }
        (true, None) => {
            if args.heartbeat_interval_secs == 0 {
                bail!("HEARTBEAT_INTERVAL_SECS must be greater than 0");
            }
            WorkerIdSource::Coordinated {
                ip: args.snowflake_ip.unwrap_or_else(discover_host_ip),
                port: args.snowflake_port.unwrap_or(listen_port),
                heartbeat_interval: Duration::from_secs(args.heartbeat_interval_secs),
            }
        }
    };

    Ok(SnowflakeSettings {
        epoch: Duration::from_millis(args.snowflake_epoch_ms),
        worker,
    })
}

/// The address of the interface outbound traffic would leave from.
///
/// Connecting a UDP socket sends nothing; it only makes the OS pick a route.
/// Falls back to the loopback address when no route exists.
pub fn discover_host_ip() -> IpAddr {
    let outbound_ip = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(10, 255, 255, 255), 1))?;
        Ok(socket.local_addr()?.ip())
    };
    match outbound_ip() {
        Ok(ip) if !ip.is_unspecified() && !ip.is_loopback() => ip,
        _ => IpAddr::V4(Ipv4Addr::LOCALHOST),
    }
}
