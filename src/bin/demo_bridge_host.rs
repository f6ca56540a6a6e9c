// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Host-side bridge demo (the DAW role): performs the handshake against a
// running demo_bridge_peer, then consumes audio blocks and reports levels.
//
// Usage: demo_bridge_host [expected_peer_fragment]
//
// Start either side first; the handshake converges regardless of order.

use std::time::Duration;

use audiolink::{
    platform_validator, Bridge, BridgeConfig, ProcessNotifier, Role, SignalHub, BUFFER_CAPACITY,
};

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("audiolink=info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

fn rms(block: &[f32]) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    let sum: f32 = block.iter().map(|s| s * s).sum();
    (sum / block.len() as f32).sqrt()
}

fn main() {
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let expected = args
        .get(1)
        .map(String::as_str)
        .unwrap_or("demo_bridge_peer");

    let cfg = BridgeConfig::new(Role::Host, expected);
    let hub = SignalHub::install(cfg.rendezvous_signo, cfg.ready_signo).expect("signal handlers");
    let notifier = ProcessNotifier::new(cfg.rendezvous_signo, cfg.ready_signo);
    let mut bridge = Bridge::new(cfg, Box::new(platform_validator()), Box::new(notifier));

    tracing::info!(pid = std::process::id(), expected, "host starting handshake");
    if let Err(e) = bridge.start() {
        tracing::warn!(error = %e, "initial start failed; running without peer");
    }

    // Normal control flow polls the event flags; nothing happens inside
    // the signal handlers themselves.
    while !bridge.is_connected() {
        if let Err(e) = bridge.pump(&hub) {
            tracing::error!(error = %e, "handshake failed");
            std::process::exit(1);
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    let channel = bridge.channel().expect("connected bridge has a channel");
    tracing::info!(
        secret_len = channel.secret().len(),
        "connected; waiting for block size"
    );

    let frames = match channel.wait_block_size(Duration::from_secs(10)) {
        Ok(Some(n)) => n,
        Ok(None) => {
            tracing::error!("peer never negotiated a block size");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!(error = %e, "parameter wait failed");
            std::process::exit(1);
        }
    };
    tracing::info!(frames, "block size negotiated");

    let mut left = vec![0.0f32; BUFFER_CAPACITY];
    let mut right = vec![0.0f32; BUFFER_CAPACITY];
    let mut blocks: u64 = 0;
    loop {
        match channel.read_block_timeout(&mut left, &mut right, Duration::from_millis(500)) {
            Ok(Some(n)) => {
                blocks += 1;
                if blocks % 50 == 0 {
                    tracing::info!(
                        blocks,
                        rms_l = rms(&left[..n]),
                        rms_r = rms(&right[..n]),
                        "receiving"
                    );
                }
            }
            Ok(None) => {
                if !channel.is_writer_open() {
                    tracing::info!(blocks, "writer closed; done");
                    break;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "read failed");
                break;
            }
        }
    }

    bridge.disconnect();
}
