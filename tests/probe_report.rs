//! Shape of the printed JSON result summary.

use meshtac::probe::{ProbeReport, TacticalRequest, FIRMWARE_ACK_SIGNATURE};
use tokio::time::Duration;

#[test]
fn summary_reflects_outcome_and_request() {
    let report = ProbeReport {
        request: TacticalRequest {
            contact: 1,
            distance: 2,
            order: 3,
        },
        found: true,
        matches: 1,
        elapsed: Duration::from_millis(1234),
    };
    let json = report.summary_json(Duration::from_secs(10));

    assert_eq!(json["status"], "ok");
    assert_eq!(json["signature"], FIRMWARE_ACK_SIGNATURE);
    assert_eq!(json["signature_found"], true);
    assert_eq!(json["contact_index"], 1);
    assert_eq!(json["distance_index"], 2);
    assert_eq!(json["order_index"], 3);
    assert_eq!(json["elapsed_ms"], 1234);
    assert_eq!(json["listen_window_seconds"], 10);
}

#[test]
fn timeout_status_when_not_found() {
    let report = ProbeReport {
        request: TacticalRequest {
            contact: 0,
            distance: 0,
            order: 0,
        },
        found: false,
        matches: 0,
        elapsed: Duration::from_secs(10),
    };
    let json = report.summary_json(Duration::from_secs(10));
    assert_eq!(json["status"], "timeout");
    assert_eq!(json["signature_found"], false);
    assert_eq!(json["matches"], 0);
}
