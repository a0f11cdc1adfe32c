//! Integration tests: load the fixture schema from disk, decode and re-encode
//! captured messages, framing edge cases, streams and shared use across threads.

use datafus_codec::dump::{entity_from_json, entity_to_dump, entity_to_json, NAME_KEY};
use datafus_codec::frame::FrameHeader;
use datafus_codec::{decode_stream, loader, Codec, CodecError, Entity, Value};
use std::path::PathBuf;

const RECRUITMENT_HEX: &str =
    "58c12604b79a01000000000000010100000032000a4a75616e2d426f6d6261427889362ce540000000";

fn fixture_codec() -> Codec {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures");
    Codec::new(loader::load_dir(&dir).expect("load fixture schema"))
}

fn recruitment_message() -> Entity {
    let data = Entity::new("GuildRecruitmentInformation")
        .with("minLevelFacultative", false)
        .with("invalidatedByModeration", false)
        .with("recruitmentAutoLocked", true)
        .with("socialId", 19767i32)
        .with("recruitmentType", 0i8)
        .with("recruitmentTitle", "")
        .with("recruitmentText", "")
        .with("selectedLanguages", vec![Value::I32(1)])
        .with("selectedCriterion", Vec::<Value>::new())
        .with("minLevel", 50i16)
        .with("lastEditPlayerName", "Juan-Bomba")
        .with("lastEditDate", 1686099906132.0f64)
        .with("minSuccess", 0i32)
        .with("minSuccessFacultative", false);
    Entity::new("RecruitmentInformationMessage").with("recruitmentData", data)
}

#[test]
fn decode_recruitment_message() {
    let codec = fixture_codec();
    let bytes = hex::decode(RECRUITMENT_HEX).expect("hex");
    let decoded = codec.decode_message(&bytes).expect("decode");

    assert_eq!(decoded.entity.name, "RecruitmentInformationMessage");
    assert_eq!(decoded.consumed, bytes.len());
    assert_eq!(decoded.header.id, 5680);
    assert_eq!(decoded.header.declared_len, Some(38));
    assert_eq!(decoded.entity, recruitment_message());

    let data = decoded.entity.get("recruitmentData").and_then(Value::as_entity).expect("nested");
    assert_eq!(data.name, "GuildRecruitmentInformation");
    assert_eq!(data.get("lastEditPlayerName").and_then(Value::as_str), Some("Juan-Bomba"));
    assert_eq!(data.get("socialId").and_then(Value::as_i64), Some(19767));
}

#[test]
fn encode_reproduces_capture() {
    let codec = fixture_codec();
    let encoded = codec.encode_message(&recruitment_message()).expect("encode");
    assert_eq!(hex::encode(encoded), RECRUITMENT_HEX);
}

#[test]
fn decoded_tree_reencodes_identically() {
    let codec = fixture_codec();
    let bytes = hex::decode(RECRUITMENT_HEX).expect("hex");
    let decoded = codec.decode_message(&bytes).expect("decode");
    assert_eq!(codec.encode_message(&decoded.entity).expect("encode"), bytes);
}

#[test]
fn json_rendering_reencodes_identically() {
    let codec = fixture_codec();
    let bytes = hex::decode(RECRUITMENT_HEX).expect("hex");
    let decoded = codec.decode_message(&bytes).expect("decode");

    let text = entity_to_json(codec.schema(), &decoded.entity).to_string();
    let parsed: serde_json::Value = serde_json::from_str(&text).expect("parse");
    let entity = entity_from_json(&parsed).expect("from json");
    assert_eq!(entity.name, "RecruitmentInformationMessage");
    assert_eq!(hex::encode(codec.encode_message(&entity).expect("encode")), RECRUITMENT_HEX);
}

#[test]
fn json_and_dump_list_attributes_in_wire_order() {
    let codec = fixture_codec();
    let json = entity_to_json(codec.schema(), &recruitment_message());
    let keys: Vec<&str> = json["recruitmentData"]
        .as_object()
        .expect("object")
        .keys()
        .map(String::as_str)
        .collect();
    let wire_order = [
        NAME_KEY,
        "minLevelFacultative",
        "invalidatedByModeration",
        "recruitmentAutoLocked",
        "socialId",
        "recruitmentType",
        "recruitmentTitle",
        "recruitmentText",
        "selectedLanguages",
        "selectedCriterion",
        "minLevel",
        "lastEditPlayerName",
        "lastEditDate",
        "minSuccess",
        "minSuccessFacultative",
    ];
    assert_eq!(keys, wire_order);

    let dump = entity_to_dump(codec.schema(), &recruitment_message());
    let dumped: Vec<&str> = dump
        .lines()
        .filter(|l| l.starts_with("    ") && !l.starts_with("     ") && l.contains(':'))
        .filter_map(|l| l.trim().split(':').next())
        .collect();
    assert_eq!(dumped, &wire_order[1..]);
}

#[test]
fn trailing_data_is_reported_not_consumed() {
    let codec = fixture_codec();
    let hex_with_trailer = format!("{}9999", RECRUITMENT_HEX);
    let bytes = hex::decode(&hex_with_trailer).expect("hex");
    let decoded = codec.decode_message(&bytes).expect("decode");
    let clean = codec.decode_message(&hex::decode(RECRUITMENT_HEX).expect("hex")).expect("decode");

    assert_eq!(decoded.entity, clean.entity);
    assert_eq!(decoded.consumed, hex_with_trailer.len() / 2 - 2);
}

#[test]
fn header_decomposition() {
    let word: u16 = 0x58C1;
    assert_eq!(word, 22721);
    let (id, len_code) = FrameHeader::split_word(word);
    assert_eq!(u32::from(id), (22721u32 >> 2) & 0x3FFF);
    assert_eq!(u32::from(len_code), 22721u32 & 0x3);

    let header = FrameHeader::read(&hex::decode(RECRUITMENT_HEX).expect("hex")).expect("header");
    assert_eq!((header.id, header.len_code, header.header_len), (id, len_code, 3));
}

#[test]
fn truncated_message_is_underrun() {
    let codec = fixture_codec();
    let bytes = hex::decode(RECRUITMENT_HEX).expect("hex");
    for cut in 0..bytes.len() {
        match codec.decode_message(&bytes[..cut]) {
            Err(CodecError::BufferUnderrun { .. }) => {}
            other => panic!("prefix of {} bytes: expected underrun, got {:?}", cut, other),
        }
    }
}

#[test]
fn unknown_message_id() {
    let codec = fixture_codec();
    // id 9999, no length field
    let word: u16 = 9999 << 2;
    let err = codec.decode_message(&word.to_be_bytes()).unwrap_err();
    assert!(matches!(err, CodecError::SchemaLookup(_)));
}

#[test]
fn encode_unknown_entity() {
    let codec = fixture_codec();
    let err = codec.encode_message(&Entity::new("NoSuchMessage")).unwrap_err();
    assert!(matches!(err, CodecError::SchemaLookup(_)));
}

#[test]
fn empty_body_has_no_length_field() {
    let codec = fixture_codec();
    let encoded = codec
        .encode_message(&Entity::new("RecruitmentInformationRequestMessage"))
        .expect("encode");
    assert_eq!(encoded, ((5681u16 << 2).to_be_bytes()).to_vec());
    let decoded = codec.decode_message(&encoded).expect("decode");
    assert_eq!(decoded.header.declared_len, None);
    assert_eq!(decoded.consumed, 2);
    assert!(decoded.entity.attributes.is_empty());
}

#[test]
fn decode_stream_back_to_back() {
    let codec = fixture_codec();
    let one = hex::decode(RECRUITMENT_HEX).expect("hex");
    let request = codec
        .encode_message(&Entity::new("RecruitmentInformationRequestMessage"))
        .expect("encode");
    // unknown id 9999 with a 2-byte length field
    let unknown_word: u16 = (9999 << 2) | 1;
    let mut unknown = unknown_word.to_be_bytes().to_vec();
    unknown.extend_from_slice(&[0x02, 0xAA, 0xBB]);

    let mut stream = one.clone();
    stream.extend_from_slice(&request);
    stream.extend_from_slice(&unknown);
    stream.extend_from_slice(&one);

    let result = decode_stream(&codec, &stream);
    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
    let names: Vec<_> = result.messages.iter().map(|m| m.entity.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "RecruitmentInformationMessage",
            "RecruitmentInformationRequestMessage",
            "RecruitmentInformationMessage"
        ]
    );
    assert_eq!(result.messages[0].byte_range, (0, one.len()));
    assert_eq!(result.skipped.len(), 1);
    assert_eq!(result.skipped[0].id, 9999);
    let skip_start = one.len() + request.len();
    assert_eq!(result.skipped[0].byte_range, (skip_start, skip_start + 5));
    assert_eq!(result.messages[2].byte_range, (skip_start + 5, stream.len()));
}

#[test]
fn decode_stream_stops_on_garbage() {
    let codec = fixture_codec();
    let mut stream = hex::decode(RECRUITMENT_HEX).expect("hex");
    let good_len = stream.len();
    stream.extend_from_slice(&[0x58, 0xC1, 0x26, 0x04]);

    let result = decode_stream(&codec, &stream);
    assert_eq!(result.messages.len(), 1);
    let (offset, err) = result.error.expect("error");
    assert_eq!(offset, good_len);
    assert!(matches!(err, CodecError::BufferUnderrun { .. }));
}

#[test]
fn shared_codec_across_threads() {
    let codec = fixture_codec();
    let bytes = hex::decode(RECRUITMENT_HEX).expect("hex");
    let expected = recruitment_message();
    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..50 {
                    let decoded = codec.decode_message(&bytes).expect("decode");
                    assert_eq!(decoded.entity, expected);
                    assert_eq!(codec.encode_message(&decoded.entity).expect("encode"), bytes);
                }
            });
        }
    });
}

#[test]
fn schema_version_label() {
    let codec = fixture_codec();
    assert_eq!(codec.schema().version(), Some("fixtures"));
    assert_eq!(codec.schema().name_for_id(5680), Some("RecruitmentInformationMessage"));
}
