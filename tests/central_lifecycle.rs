//! Central lifecycle against a recording stack double.

mod common;

use blelink::ble::{hci, AdvType, CentralEvent, ConnHandle, SessionParameters};
use blelink::{CentralConfig, CentralController, CentralState, Command, Error, StackError};
use common::{found, name_ad, Call, MockCentral, OTHER, PEER};

fn central() -> CentralController<MockCentral> {
    CentralController::new(MockCentral::default(), CentralConfig::default()).unwrap()
}

/// Scanning -> Connecting against PEER; returns the pending handle.
fn connecting(central: &mut CentralController<MockCentral>) -> ConnHandle {
    central.start().unwrap();
    let ad = name_ad("buggy-device");
    central.handle_event(found(PEER, &ad)).unwrap();
    assert_eq!(central.state(), CentralState::Connecting);
    central.connection().unwrap()
}

fn ready(central: &mut CentralController<MockCentral>) -> ConnHandle {
    let conn = connecting(central);
    central
        .handle_event(CentralEvent::Connected { conn, status: 0 })
        .unwrap();
    central
        .handle_event(CentralEvent::MtuExchanged {
            conn,
            status: 0,
            mtu: 247,
        })
        .unwrap();
    assert_eq!(central.state(), CentralState::Ready);
    conn
}

// ═══════════════════════════════════════════════════════════════════════════
// Happy path
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn discover_connect_and_negotiate() {
    let mut central = central();
    central.start().unwrap();
    assert_eq!(central.state(), CentralState::Scanning);
    assert_eq!(central.stack().calls, vec![Call::StartScan]);

    // Someone else first.
    let other = name_ad("fitness-band");
    central.handle_event(found(OTHER, &other)).unwrap();
    assert_eq!(central.state(), CentralState::Scanning);
    assert_eq!(central.stack().calls.len(), 1);

    let ad = name_ad("buggy-device");
    central.handle_event(found(PEER, &ad)).unwrap();
    let conn = central.connection().unwrap();
    assert_eq!(central.peer(), Some(PEER));
    assert_eq!(
        central.stack().calls,
        vec![Call::StartScan, Call::StopScan, Call::Connect(PEER)]
    );

    central
        .handle_event(CentralEvent::Connected { conn, status: 0 })
        .unwrap();
    assert_eq!(central.state(), CentralState::Connected);
    assert_eq!(central.stack().calls.last(), Some(&Call::ExchangeMtu(conn)));

    central
        .handle_event(CentralEvent::MtuExchanged {
            conn,
            status: 0,
            mtu: 247,
        })
        .unwrap();
    assert_eq!(central.state(), CentralState::Ready);
    assert_eq!(central.session_parameters().att_mtu, Some(247));
    assert_eq!(central.stack().releases(), 0);
}

#[test]
fn scan_uses_active_fast_parameters() {
    let mut central = central();
    central.start().unwrap();
    let params = central.stack().last_scan.unwrap();
    assert_eq!(params.scan_type, blelink::ble::ScanType::Active);
    assert!(!params.filter_duplicates);
    assert_eq!((params.interval, params.window), (0x0060, 0x0030));
}

#[test]
fn non_connectable_report_with_matching_name_is_skipped() {
    let mut central = central();
    central.start().unwrap();
    let ad = name_ad("buggy-device");
    central
        .handle_event(CentralEvent::DeviceFound {
            addr: PEER,
            rssi: -40,
            adv_type: AdvType::NonConnectableUndirected,
            data: &ad,
        })
        .unwrap();
    assert_eq!(central.state(), CentralState::Scanning);
    assert_eq!(central.stack().connects(), 0);
}

#[test]
fn reports_before_start_are_ignored() {
    let mut central = central();
    let ad = name_ad("buggy-device");
    central.handle_event(found(PEER, &ad)).unwrap();
    assert_eq!(central.state(), CentralState::Idle);
    assert!(central.stack().calls.is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════
// Recovery
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn failed_connection_releases_and_rescans() {
    let mut central = central();
    let conn = connecting(&mut central);
    central.stack_mut().clear();

    central
        .handle_event(CentralEvent::Connected {
            conn,
            status: hci::CONN_FAILED_TO_BE_ESTABLISHED,
        })
        .unwrap();

    assert_eq!(central.stack().calls, vec![Call::Release(conn), Call::StartScan]);
    assert_eq!(central.state(), CentralState::Scanning);
    assert_eq!(central.connection(), None);
    assert_eq!(central.peer(), None);
}

#[test]
fn link_loss_releases_and_rescans() {
    let mut central = central();
    let conn = ready(&mut central);
    central.stack_mut().clear();

    central
        .handle_event(CentralEvent::Disconnected {
            conn,
            reason: 0x08, // supervision timeout
        })
        .unwrap();

    assert_eq!(central.stack().calls, vec![Call::Release(conn), Call::StartScan]);
    assert_eq!(central.state(), CentralState::Scanning);
    assert_eq!(central.session_parameters(), SessionParameters::unnegotiated());
}

#[test]
fn reconnects_after_link_loss_with_a_new_handle() {
    let mut central = central();
    let first = ready(&mut central);
    central
        .handle_event(CentralEvent::Disconnected {
            conn: first,
            reason: hci::REMOTE_USER_TERMINATED_CONNECTION,
        })
        .unwrap();

    let ad = name_ad("buggy-device");
    central.handle_event(found(PEER, &ad)).unwrap();
    let second = central.connection().unwrap();
    assert_ne!(first, second);

    // Late teardown of the first link changes nothing.
    central
        .handle_event(CentralEvent::Disconnected {
            conn: first,
            reason: hci::REMOTE_USER_TERMINATED_CONNECTION,
        })
        .unwrap();
    assert_eq!(central.state(), CentralState::Connecting);
    assert_eq!(central.stack().released(first), 1);
    assert_eq!(central.stack().released(second), 0);
}

#[test]
fn stale_disconnect_is_a_no_op() {
    let mut central = central();
    let conn = ready(&mut central);
    central.stack_mut().clear();

    central
        .handle_event(CentralEvent::Disconnected {
            conn: ConnHandle(conn.0 + 40),
            reason: hci::REMOTE_USER_TERMINATED_CONNECTION,
        })
        .unwrap();

    assert!(central.stack().calls.is_empty());
    assert_eq!(central.state(), CentralState::Ready);
    assert_eq!(central.connection(), Some(conn));
}

#[test]
fn duplicate_disconnect_releases_once() {
    let mut central = central();
    let conn = ready(&mut central);
    for _ in 0..2 {
        central
            .handle_event(CentralEvent::Disconnected {
                conn,
                reason: hci::REMOTE_USER_TERMINATED_CONNECTION,
            })
            .unwrap();
    }
    assert_eq!(central.stack().released(conn), 1);
    assert_eq!(central.stack().count(|c| *c == Call::StartScan), 2);
}

#[test]
fn stop_scan_rejected_keeps_scanning() {
    let mut central = central();
    central.start().unwrap();
    central.stack_mut().fail_stop_scan = Some(StackError::INVALID_STATE);

    let ad = name_ad("buggy-device");
    let err = central.handle_event(found(PEER, &ad)).unwrap_err();

    assert_eq!(err, StackError::INVALID_STATE.during(Command::StopScan));
    assert_eq!(central.state(), CentralState::Scanning);
    assert_eq!(central.stack().connects(), 0);
    assert_eq!(central.connection(), None);
}

#[test]
fn connect_rejected_resumes_scanning() {
    let mut central = central();
    central.start().unwrap();
    central.stack_mut().fail_connect = Some(StackError::NO_RESOURCES);

    let ad = name_ad("buggy-device");
    let err = central.handle_event(found(PEER, &ad)).unwrap_err();

    assert_eq!(err.command(), Some(Command::Connect));
    assert_eq!(
        central.stack().calls,
        vec![
            Call::StartScan,
            Call::StopScan,
            Call::Connect(PEER),
            Call::StartScan
        ]
    );
    assert_eq!(central.state(), CentralState::Scanning);
    assert_eq!(central.stack().releases(), 0);
}

#[test]
fn matches_while_connecting_do_not_reconnect() {
    let mut central = central();
    let conn = connecting(&mut central);
    let ad = name_ad("buggy-device");
    central.handle_event(found(PEER, &ad)).unwrap();
    central.handle_event(found(OTHER, &ad)).unwrap();

    assert_eq!(central.stack().connects(), 1);
    assert_eq!(central.stack().count(|c| *c == Call::StopScan), 1);
    assert_eq!(central.connection(), Some(conn));
}

#[test]
fn connected_for_untracked_handle_is_ignored() {
    let mut central = central();
    let conn = connecting(&mut central);
    central.stack_mut().clear();

    central
        .handle_event(CentralEvent::Connected {
            conn: ConnHandle(conn.0 + 1),
            status: 0,
        })
        .unwrap();

    assert!(central.stack().calls.is_empty());
    assert_eq!(central.state(), CentralState::Connecting);
}

#[test]
fn mtu_request_rejected_disconnects() {
    let mut central = central();
    let conn = connecting(&mut central);
    central.stack_mut().fail_exchange_mtu = Some(StackError::BUSY);

    let err = central
        .handle_event(CentralEvent::Connected { conn, status: 0 })
        .unwrap_err();

    assert_eq!(err, Error::Stack {
        op: Command::ExchangeMtu,
        cause: StackError::BUSY
    });
    assert_eq!(
        central.stack().calls.last(),
        Some(&Call::Disconnect(conn, hci::UNACCEPTABLE_CONN_PARAMS))
    );
    assert_eq!(central.state(), CentralState::Connected);

    central
        .handle_event(CentralEvent::Disconnected {
            conn,
            reason: hci::LOCAL_HOST_TERMINATED_CONNECTION,
        })
        .unwrap();
    assert_eq!(central.stack().released(conn), 1);
    assert_eq!(central.state(), CentralState::Scanning);
}

#[test]
fn mtu_exchange_failure_disconnects_and_never_reaches_ready() {
    let mut central = central();
    let conn = connecting(&mut central);
    central
        .handle_event(CentralEvent::Connected { conn, status: 0 })
        .unwrap();

    central
        .handle_event(CentralEvent::MtuExchanged {
            conn,
            status: 0x0E,
            mtu: 0,
        })
        .unwrap();
    assert_eq!(
        central.stack().calls.last(),
        Some(&Call::Disconnect(conn, hci::UNACCEPTABLE_CONN_PARAMS))
    );

    // A late success while the disconnect is in flight is ignored.
    central
        .handle_event(CentralEvent::MtuExchanged {
            conn,
            status: 0,
            mtu: 247,
        })
        .unwrap();
    assert_eq!(central.state(), CentralState::Connected);
    assert_eq!(central.session_parameters().att_mtu, None);
}

#[test]
fn rescan_rejected_after_link_loss_goes_idle() {
    let mut central = central();
    let conn = ready(&mut central);
    central.stack_mut().fail_start_scan = Some(StackError::BUSY);

    let err = central
        .handle_event(CentralEvent::Disconnected {
            conn,
            reason: hci::REMOTE_USER_TERMINATED_CONNECTION,
        })
        .unwrap_err();

    assert_eq!(err.command(), Some(Command::StartScan));
    assert_eq!(central.state(), CentralState::Idle);
    assert_eq!(central.stack().released(conn), 1);

    // Caller can try again once the stack recovers.
    central.stack_mut().fail_start_scan = None;
    central.start().unwrap();
    assert_eq!(central.state(), CentralState::Scanning);
}

#[test]
fn initial_scan_rejected_stays_idle() {
    let mut central = central();
    central.stack_mut().fail_start_scan = Some(StackError::INVALID_STATE);
    assert!(central.start().is_err());
    assert_eq!(central.state(), CentralState::Idle);
}

// ═══════════════════════════════════════════════════════════════════════════
// Stop
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn stop_while_connecting_ends_idle_without_rescan() {
    let mut central = central();
    let conn = connecting(&mut central);
    central.stack_mut().clear();

    central.stop().unwrap();
    assert_eq!(
        central.stack().calls,
        vec![Call::Disconnect(conn, hci::REMOTE_USER_TERMINATED_CONNECTION)]
    );

    central
        .handle_event(CentralEvent::Connected {
            conn,
            status: hci::LOCAL_HOST_TERMINATED_CONNECTION,
        })
        .unwrap();

    assert_eq!(central.state(), CentralState::Idle);
    assert_eq!(central.stack().released(conn), 1);
    assert_eq!(central.stack().count(|c| *c == Call::StartScan), 0);
}

#[test]
fn stop_while_connecting_then_link_up_disconnects_once() {
    let mut central = central();
    let conn = connecting(&mut central);
    central.stop().unwrap();

    central
        .handle_event(CentralEvent::Connected { conn, status: 0 })
        .unwrap();
    assert_eq!(central.stack().count(|c| matches!(c, Call::Disconnect(..))), 1);
    assert_eq!(central.stack().count(|c| matches!(c, Call::ExchangeMtu(_))), 0);

    central
        .handle_event(CentralEvent::Disconnected {
            conn,
            reason: hci::LOCAL_HOST_TERMINATED_CONNECTION,
        })
        .unwrap();
    assert_eq!(central.state(), CentralState::Idle);
    assert_eq!(central.stack().released(conn), 1);
}

#[test]
fn rejected_disconnect_is_retried_on_next_mtu_failure() {
    let mut central = central();
    let conn = connecting(&mut central);
    central.stack_mut().fail_exchange_mtu = Some(StackError::BUSY);
    central.stack_mut().fail_disconnect = Some(StackError::BUSY);

    let err = central
        .handle_event(CentralEvent::Connected { conn, status: 0 })
        .unwrap_err();
    assert_eq!(err.command(), Some(Command::ExchangeMtu));
    assert_eq!(central.state(), CentralState::Connected);

    central.stack_mut().fail_disconnect = None;
    central
        .handle_event(CentralEvent::MtuExchanged {
            conn,
            status: 0x0E,
            mtu: 23,
        })
        .unwrap();

    let disconnects = central
        .stack()
        .count(|c| *c == Call::Disconnect(conn, hci::UNACCEPTABLE_CONN_PARAMS));
    assert_eq!(disconnects, 2);
    assert_eq!(central.state(), CentralState::Connected);

    central
        .handle_event(CentralEvent::Disconnected {
            conn,
            reason: hci::LOCAL_HOST_TERMINATED_CONNECTION,
        })
        .unwrap();
    assert_eq!(central.stack().released(conn), 1);
    assert_eq!(central.state(), CentralState::Scanning);
}

#[test]
fn scan_ended_by_stack_goes_idle() {
    let mut central = central();
    central.start().unwrap();

    let err = central
        .handle_event(CentralEvent::ScanStopped {
            cause: StackError::TIMEOUT,
        })
        .unwrap_err();
    assert_eq!(err, Error::Stack {
        op: Command::StartScan,
        cause: StackError::TIMEOUT
    });
    assert_eq!(central.state(), CentralState::Idle);
    // No automatic rescan.
    assert_eq!(central.stack().calls, vec![Call::StartScan]);

    central.start().unwrap();
    assert_eq!(central.state(), CentralState::Scanning);
}

#[test]
fn scan_end_after_match_is_ignored() {
    let mut central = central();
    let conn = connecting(&mut central);
    central.stack_mut().clear();

    central
        .handle_event(CentralEvent::ScanStopped {
            cause: StackError::INVALID_STATE,
        })
        .unwrap();
    assert!(central.stack().calls.is_empty());
    assert_eq!(central.state(), CentralState::Connecting);
    assert_eq!(central.connection(), Some(conn));
}
