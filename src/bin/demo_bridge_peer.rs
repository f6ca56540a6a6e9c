// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Peer-side bridge demo (the external synth role): performs the handshake
// against a running demo_bridge_host, then produces sine blocks through
// the channel.
//
// Usage: demo_bridge_peer [expected_host_fragment] [seconds]

use std::time::Duration;

use audiolink::{
    platform_validator, Bridge, BridgeConfig, ProcessNotifier, Role, SignalHub,
};

const SAMPLE_RATE: f32 = 48_000.0;
const BLOCK_FRAMES: usize = 256;

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("audiolink=info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

fn render_sine(left: &mut [f32], right: &mut [f32], block_index: u64) {
    let freq: f32 = 440.0;
    let two_pi = 2.0 * std::f32::consts::PI;
    for f in 0..left.len() {
        let t = (block_index as f32 * left.len() as f32 + f as f32) / SAMPLE_RATE;
        let s = (two_pi * freq * t).sin();
        left[f] = s * 0.5;
        right[f] = s * 0.5;
    }
}

fn main() {
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let expected = args
        .get(1)
        .map(String::as_str)
        .unwrap_or("demo_bridge_host");
    let seconds: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(5);

    let cfg = BridgeConfig::new(Role::Peer, expected);
    let hub = SignalHub::install(cfg.rendezvous_signo, cfg.ready_signo).expect("signal handlers");
    let notifier = ProcessNotifier::new(cfg.rendezvous_signo, cfg.ready_signo);
    let mut bridge = Bridge::new(cfg, Box::new(platform_validator()), Box::new(notifier));

    tracing::info!(pid = std::process::id(), expected, "peer starting handshake");
    if let Err(e) = bridge.start() {
        tracing::warn!(error = %e, "initial start failed; waiting for host");
    }

    while !bridge.is_connected() {
        if let Err(e) = bridge.pump(&hub) {
            tracing::error!(error = %e, "handshake failed");
            std::process::exit(1);
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    let channel = bridge.channel().expect("connected bridge has a channel");
    channel.open_writer();
    if let Err(e) = channel.negotiate_block_size(BLOCK_FRAMES) {
        tracing::error!(error = %e, "block size negotiation failed");
        std::process::exit(1);
    }
    tracing::info!(frames = BLOCK_FRAMES, "connected; producing");

    let mut left = vec![0.0f32; BLOCK_FRAMES];
    let mut right = vec![0.0f32; BLOCK_FRAMES];
    let total_blocks = (seconds as f32 * SAMPLE_RATE / BLOCK_FRAMES as f32) as u64;
    for block_index in 0..total_blocks {
        render_sine(&mut left, &mut right, block_index);
        if let Err(e) = channel.write_block(&left, &right) {
            tracing::error!(error = %e, "write failed");
            break;
        }
    }

    channel.close_writer();
    tracing::info!(total_blocks, "done producing");
    bridge.disconnect();
}
