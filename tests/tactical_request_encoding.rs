//! The constructed request must carry the three indices unmodified all the
//! way through protobuf encoding and the serial frame wrapper.

use meshtac::device::framing;
use meshtac::probe::TacticalRequest;
use meshtac::protobuf::radio_generated as proto;
use prost::Message;

fn roundtrip(req: TacticalRequest) -> proto::SendTacticalMessageRequest {
    let msg = proto::ToRadio {
        payload_variant: Some(proto::to_radio::PayloadVariant::SendTacticalMessageRequest(
            req.to_proto(),
        )),
    };
    let mut encoded = Vec::new();
    msg.encode(&mut encoded).unwrap();

    let decoded = proto::ToRadio::decode(encoded.as_slice()).unwrap();
    match decoded.payload_variant {
        Some(proto::to_radio::PayloadVariant::SendTacticalMessageRequest(r)) => r,
        other => panic!("wrong payload variant: {:?}", other),
    }
}

#[test]
fn indices_survive_encoding() {
    for (c, d, o) in [(0, 0, 0), (1, 4, 7), (8, 8, 8), (3, 0, 5)] {
        let wire = roundtrip(TacticalRequest {
            contact: c,
            distance: d,
            order: o,
        });
        assert_eq!((wire.contact_index, wire.distance_index, wire.order_index), (c, d, o));
    }
}

#[test]
fn undocumented_indices_pass_through_unchanged() {
    // Range 0-8 is documentation, not enforcement.
    let wire = roundtrip(TacticalRequest {
        contact: 255,
        distance: 1000,
        order: 9,
    });
    assert_eq!(wire.contact_index, 255);
    assert_eq!(wire.distance_index, 1000);
    assert_eq!(wire.order_index, 9);
}

#[test]
fn request_rides_as_top_level_control_message() {
    // The request is a ToRadio payload variant of its own, never wrapped in a
    // MeshPacket envelope.
    let msg = proto::ToRadio {
        payload_variant: Some(proto::to_radio::PayloadVariant::SendTacticalMessageRequest(
            TacticalRequest {
                contact: 2,
                distance: 2,
                order: 2,
            }
            .to_proto(),
        )),
    };
    let mut encoded = Vec::new();
    msg.encode(&mut encoded).unwrap();
    let decoded = proto::ToRadio::decode(encoded.as_slice()).unwrap();
    assert!(!matches!(
        decoded.payload_variant,
        Some(proto::to_radio::PayloadVariant::Packet(_))
    ));
}

#[test]
fn framed_request_decodes_from_the_wire_bytes() {
    let msg = proto::ToRadio {
        payload_variant: Some(proto::to_radio::PayloadVariant::SendTacticalMessageRequest(
            TacticalRequest {
                contact: 6,
                distance: 1,
                order: 4,
            }
            .to_proto(),
        )),
    };
    let mut payload = Vec::new();
    msg.encode(&mut payload).unwrap();
    let frame = framing::encode_frame(&payload).unwrap();

    // Strip the header the way the firmware does and decode.
    let declared = ((frame[2] as usize) << 8) | frame[3] as usize;
    assert_eq!(declared, payload.len());
    let decoded = proto::ToRadio::decode(&frame[4..]).unwrap();
    match decoded.payload_variant {
        Some(proto::to_radio::PayloadVariant::SendTacticalMessageRequest(r)) => {
            assert_eq!((r.contact_index, r.distance_index, r.order_index), (6, 1, 4));
        }
        other => panic!("wrong payload variant: {:?}", other),
    }
}
