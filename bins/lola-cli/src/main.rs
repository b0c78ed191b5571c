//! Demo driver for one service type: a single "speed" event of `u32`
//! samples. `-service_instance_manifest <path>` is mandatory, matching the
//! real binding's option name; there is no `--` form, since this binding
//! never grew a second long-flag convention to be backward compatible with.
//!
//! `-mode offer` runs the producer side (publishes an incrementing speed
//! once a second); `-mode consume` runs the consumer side (polls for new
//! samples and prints them). Defaults to `offer`.

use anyhow::{bail, Context, Result};
use lola_config::ServiceInstanceManifest;
use lola_proxy::{Proxy, ServiceInstanceHandle};
use lola_runtime::Runtime;
use lola_skeleton::{EventTypeLayout, Skeleton};
use lola_types::EventId;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SPEED_EVENT: EventId = EventId(1);

struct Args {
    manifest_path: String,
    mode: String,
}

fn parse_args() -> Result<Args> {
    let mut manifest_path = None;
    let mut mode = "offer".to_string();

    let mut raw = std::env::args().skip(1);
    while let Some(flag) = raw.next() {
        match flag.as_str() {
            "-service_instance_manifest" => {
                manifest_path = Some(raw.next().context("-service_instance_manifest requires a path")?);
            }
            "-mode" => {
                mode = raw.next().context("-mode requires a value")?;
            }
            other => bail!("unrecognized option '{other}'"),
        }
    }

    Ok(Args {
        manifest_path: manifest_path.context("missing mandatory option -service_instance_manifest")?,
        mode,
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("INFO")))
        .init();

    let args = parse_args()?;
    let manifest = ServiceInstanceManifest::load(&args.manifest_path)
        .with_context(|| format!("loading manifest '{}'", args.manifest_path))?;

    Runtime::init(manifest.global.quality_level, manifest.global.shm_size_calc_mode)
        .unwrap_or_else(|runtime| runtime);

    match args.mode.as_str() {
        "offer" => run_offer(&manifest),
        "consume" => run_consume(&manifest),
        other => bail!("unrecognized -mode '{other}', expected 'offer' or 'consume'"),
    }
}

fn run_offer(manifest: &ServiceInstanceManifest) -> Result<()> {
    let mut layouts = HashMap::new();
    layouts.insert(SPEED_EVENT, EventTypeLayout::of::<u32>());

    let skeleton = Skeleton::offer_service(manifest, &layouts).context("offer_service failed")?;
    info!(
        service_id = %skeleton.service_id(),
        instance_id = %skeleton.instance_id(),
        "LoLa: offering speed service instance"
    );

    let mut speed: u32 = 0;
    loop {
        speed = speed.wrapping_add(1);
        if let Err(e) = skeleton.send(SPEED_EVENT, speed) {
            tracing::warn!(error = %e, "send failed");
        }
        std::thread::sleep(Duration::from_secs(1));
    }
}

fn run_consume(manifest: &ServiceInstanceManifest) -> Result<()> {
    let handle = ServiceInstanceHandle::new(manifest.service_type.service_id, manifest.instance.instance_id);
    let proxy = Proxy::new(handle).context("attaching proxy failed (is the offering process running?)")?;
    let skeleton_pid = Runtime::get().pid();
    proxy.subscribe(SPEED_EVENT, skeleton_pid)?;
    info!(%handle, "LoLa: subscribed to speed event");

    loop {
        let samples = proxy.get_new_samples::<u32>(SPEED_EVENT, 10)?;
        for sample in &samples {
            info!(value = **sample, timestamp = sample.timestamp, "LoLa: new sample");
        }
        std::thread::sleep(Duration::from_millis(200));
    }
}
