//! Integration tests for pkt-line framing.

use std::io::Cursor;

use gitwire_protocol::pktline::{PktLine, PktReader, PktWriter, MAX_PKT_DATA_LEN};
use gitwire_protocol::ProtocolError;
use proptest::prelude::*;

#[test]
fn roundtrip_various_sizes() {
    let sizes = [1, 4, 100, 1000, 65000, MAX_PKT_DATA_LEN];

    for size in sizes {
        let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8 + 1).collect();
        let mut buf = Vec::new();
        {
            let mut writer = PktWriter::new(&mut buf);
            writer.write_data(&payload).unwrap();
        }

        let mut reader = PktReader::new(Cursor::new(buf));
        let pkt = reader.read_line().unwrap().unwrap();
        assert_eq!(pkt.wire_len(), size + 4);
        assert_eq!(pkt.data(), Some(&payload[..]), "roundtrip failed for size {}", size);
    }
}

#[test]
fn max_payload_has_length_fff0_and_one_more_fails() {
    let payload = vec![b'a'; MAX_PKT_DATA_LEN];
    let mut buf = Vec::new();
    {
        let mut writer = PktWriter::new(&mut buf);
        writer.write_data(&payload).unwrap();
    }
    assert_eq!(&buf[..4], b"fff0");

    let mut reader = PktReader::new(Cursor::new(buf));
    let pkt = reader.read_line().unwrap().unwrap();
    assert_eq!(pkt.wire_len(), 0xfff0);
    assert_eq!(pkt.data(), Some(&payload[..]));

    let over = vec![b'a'; MAX_PKT_DATA_LEN + 1];
    let mut writer = PktWriter::new(Vec::new());
    assert!(matches!(
        writer.write_data(&over),
        Err(ProtocolError::PayloadTooLong(_))
    ));
}

#[test]
fn multiple_sections_with_flushes() {
    let mut buf = Vec::new();
    {
        let mut w = PktWriter::new(&mut buf);
        w.write_text("section1-line1").unwrap();
        w.write_text("section1-line2").unwrap();
        w.write_flush().unwrap();
        w.write_text("section2-line1").unwrap();
        w.write_flush().unwrap();
    }

    let mut reader = PktReader::new(Cursor::new(buf));
    let mut sections = vec![Vec::new()];
    while let Some(pkt) = reader.read_line().unwrap() {
        match pkt {
            PktLine::Flush => sections.push(Vec::new()),
            PktLine::Data(d) => sections.last_mut().unwrap().push(d.to_vec()),
            _ => unreachable!(),
        }
    }
    assert_eq!(sections[0].len(), 2);
    assert_eq!(sections[1].len(), 1);
    assert_eq!(sections[0][0], b"section1-line1\n");
}

#[test]
fn binary_payload_survives() {
    let payload: Vec<u8> = (1..=255).collect();
    let mut buf = Vec::new();
    {
        let mut writer = PktWriter::new(&mut buf);
        writer.write_data(&payload).unwrap();
    }
    let mut reader = PktReader::new(Cursor::new(buf));
    assert_eq!(reader.read_line().unwrap().unwrap().data(), Some(&payload[..]));
}

#[test]
fn peek_is_idempotent_across_sentinels() {
    let mut buf = Vec::new();
    {
        let mut w = PktWriter::new(&mut buf);
        w.write_text("data").unwrap();
        w.write_delim().unwrap();
        w.write_flush().unwrap();
    }

    let mut reader = PktReader::new(Cursor::new(buf));
    assert!(matches!(reader.peek_line().unwrap(), Some(PktLine::Data(_))));
    assert!(matches!(reader.read_line().unwrap(), Some(PktLine::Data(_))));
    assert_eq!(reader.peek_line().unwrap(), Some(PktLine::Delim));
    assert_eq!(reader.read_line().unwrap(), Some(PktLine::Delim));
    assert_eq!(reader.peek_line().unwrap(), Some(PktLine::Flush));
    assert_eq!(reader.read_line().unwrap(), Some(PktLine::Flush));
    assert_eq!(reader.read_line().unwrap(), None);
}

#[test]
fn err_payload_is_fatal_wherever_it_appears() {
    let mut buf = Vec::new();
    {
        let mut w = PktWriter::new(&mut buf);
        w.write_text("want something").unwrap();
        w.write_error("access denied").unwrap();
    }

    let mut reader = PktReader::new(Cursor::new(buf));
    assert!(reader.read_line().unwrap().is_some());
    let err = reader.read_line().unwrap_err();
    assert!(matches!(err, ProtocolError::ErrorLine(msg) if msg == "access denied"));
}

proptest! {
    // Framing law: read(write(p)) == (|p| + 4, p) for every payload that
    // is not an ERR sentinel.
    #[test]
    fn prop_roundtrip(payload in proptest::collection::vec(any::<u8>(), 0..4096)
        .prop_filter("ERR payloads abort the stream", |p| !p.starts_with(b"ERR "))) {
        let mut buf = Vec::new();
        {
            let mut writer = PktWriter::new(&mut buf);
            writer.write_data(&payload).unwrap();
        }
        prop_assert_eq!(buf.len(), payload.len() + 4);

        let mut reader = PktReader::new(Cursor::new(buf));
        let pkt = reader.read_line().unwrap().unwrap();
        prop_assert_eq!(pkt.wire_len(), payload.len() + 4);
        prop_assert_eq!(pkt.data(), Some(&payload[..]));
        prop_assert_eq!(reader.read_line().unwrap(), None);
    }

    #[test]
    fn prop_length_field_is_lowercase_hex(payload in proptest::collection::vec(any::<u8>(), 0..512)) {
        let mut buf = Vec::new();
        {
            let mut writer = PktWriter::new(&mut buf);
            writer.write_data(&payload).unwrap();
        }
        let header = std::str::from_utf8(&buf[..4]).unwrap();
        prop_assert!(header.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        prop_assert_eq!(usize::from_str_radix(header, 16).unwrap(), payload.len() + 4);
    }
}
