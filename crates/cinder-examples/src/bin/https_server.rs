//! 最小 HTTPS 应答器：读到完整请求头后回复 `Hello world!`。
//!
//! ```bash
//! cargo run --bin https_server -- --port 8443
//! curl -k https://localhost:8443/
//! ```

use std::env;

use anyhow::{Context, Result, anyhow};
use cinder_examples::cli::{ServerArgs, USAGE};
use cinder_examples::{HelloHttpServer, Settings, telemetry};
use tracing::info;

fn main() -> Result<()> {
    telemetry::init().context("install tracing subscriber")?;
    let args = ServerArgs::parse(env::args().skip(1)).map_err(|err| anyhow!("{err}\n{USAGE}"))?;
    let settings = match &args.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("load settings from {}", path.display()))?,
        None => Settings::default(),
    };
    let settings = args.apply(settings);
    let tls = settings.tls_config().context("build tls config")?;

    info!(listen = %settings.listen, tls = tls.is_some(), "starting https responder");
    cinder_tls::run(
        HelloHttpServer,
        &settings.listen,
        tls,
        settings.engine_options(),
    )
    .with_context(|| format!("https responder on {}", settings.listen))
}
