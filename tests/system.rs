/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Runs a shell-script engine as a real child process.

#![cfg(unix)]

use std::{fs, os::unix::fs::PermissionsExt, time::Duration};

use uci_client::{
    ClientState, EngineController, EngineError, EngineSettings, SystemLauncher, UciClient,
};

const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Path to the fake engine, made executable in case the checkout dropped the mode bits.
fn fake_engine() -> String {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/fake_engine.sh");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string()
}

#[test]
fn test_client_with_child_process() {
    let mut client = UciClient::new();
    assert!(client.initialize(&SystemLauncher, &fake_engine()));
    assert_eq!(client.engine_name(), Some("Fake Engine 1.0"));
    assert_eq!(client.engine_author(), Some("Test Suite"));

    // The engine prints one option name in Latin-1
    assert!(client
        .transcript()
        .iter()
        .any(|line| line == "option name Caf\u{FFFD} type check default false"));

    client.set_option("Skill Level", "10").unwrap();
    let result = client.analyze(START, Duration::from_millis(50)).unwrap();
    assert_eq!(result.best_move.as_deref(), Some("d2d4"));
    assert_eq!(result.evaluation.as_deref(), Some("-0.05"));

    client.shutdown();
    assert_eq!(client.state(), ClientState::Terminated);
}

#[test]
fn test_client_missing_executable() {
    let mut client = UciClient::new();
    let err = client
        .try_initialize(&SystemLauncher, "/definitely/not/an/engine")
        .unwrap_err();
    assert!(matches!(err, EngineError::Spawn { .. }), "got {err:?}");
    assert_eq!(client.state(), ClientState::Failed);
}

#[test]
fn test_controller_with_child_process() {
    let controller = EngineController::new(|err| panic!("unexpected engine error: {err}")).unwrap();
    controller.apply_settings(Some(EngineSettings::enabled_at(fake_engine()).thinking_time_ms(20)));
    assert!(controller.is_ready());

    let pending = [
        controller.analyze_position(START),
        controller.analyze_position(START),
    ];
    for pending in pending {
        let result = pending.wait().unwrap();
        assert_eq!(result.best_move.as_deref(), Some("d2d4"));
        assert_eq!(result.evaluation.as_deref(), Some("-0.05"));
    }

    controller.shutdown();
    assert!(!controller.is_ready());
}
