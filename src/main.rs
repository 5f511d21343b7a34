//! x402-vrf HTTP entrypoint.
//!
//! Endpoints:
//! - `GET /mint` – Paid; requests randomness on behalf of the payer
//! - `GET /requests/{requestId}` – State of a randomness request
//! - `GET /health` – Liveness
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `CONFIG` path of the JSON configuration (default `config.json`)
//! - `HOST`, `PORT` control binding address
//! - `RUST_LOG` filters log output
//! - `OTEL_*` variables enable trace export with the `telemetry` feature

use std::process;

use x402_vrf::run::run;

#[tokio::main]
async fn main() {
    let result = run().await;
    if let Err(e) = result {
        println!("{e}");
        process::exit(1)
    }
}
