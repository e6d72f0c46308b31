//! End-to-end tests against an in-process fake daemon.
//!
//! Each test binds a Unix-domain socket in a temp directory, scripts the
//! daemon side of the exchange on a background thread, and drives the real
//! client against it.

#![cfg(unix)]

use fsd_ipc::protocol::codec::{write_pstring, write_vlq};
use fsd_ipc::protocol::{request, response, CAP_WIDE_SIZES, HEADER_LEN};
use fsd_ipc::{
    Client, Error, JournalFields, PropertyRequestFlags, PropertyValueType, PropertyVariant,
    SearchFlags, SearchState,
};
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Bind a socket, run the scripted daemon on one accepted connection
fn serve(script: impl FnOnce(UnixStream) + Send + 'static) -> (TempDir, PathBuf, JoinHandle<()>) {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("fsd.sock");
    let listener = UnixListener::bind(&path).expect("bind");
    let handle = std::thread::spawn(move || {
        if let Ok((stream, _)) = listener.accept() {
            script(stream);
        }
    });
    (dir, path, handle)
}

fn read_request(stream: &mut UnixStream) -> Option<(u32, Vec<u8>)> {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).ok()?;
    let code = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).ok()?;
    Some((code, payload))
}

fn send_message(stream: &mut UnixStream, code: u32, payload: &[u8]) {
    let mut header = Vec::with_capacity(HEADER_LEN);
    header.extend_from_slice(&code.to_le_bytes());
    header.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    stream.write_all(&header).unwrap();
    stream.write_all(payload).unwrap();
    stream.flush().unwrap();
}

/// Send one reply body split into chained messages of `piece` bytes each
fn send_chained(stream: &mut UnixStream, body: &[u8], piece: usize) {
    let mut rest = body;
    while rest.len() > piece {
        send_message(stream, response::MORE_DATA, &rest[..piece]);
        rest = &rest[piece..];
    }
    send_message(stream, response::OK, rest);
}

struct ResultReply {
    wide: bool,
    folders: u64,
    files: u64,
    /// Present on the wire only when the search requested it
    total_size: Option<u64>,
    offset: u64,
    sorts: Vec<(u32, u32)>,
    /// (property id, request flags, resolved type tag)
    props: Vec<(u32, u32, u8)>,
    rows: Vec<Vec<u8>>,
}

impl ResultReply {
    fn encode(&self) -> Vec<u8> {
        let mut b = Vec::new();
        let caps = if self.wide { CAP_WIDE_SIZES } else { 0 };
        b.extend_from_slice(&caps.to_le_bytes());
        let size = |b: &mut Vec<u8>, v: u64| {
            if self.wide {
                b.extend_from_slice(&v.to_le_bytes());
            } else {
                b.extend_from_slice(&(v as u32).to_le_bytes());
            }
        };
        size(&mut b, self.folders);
        size(&mut b, self.files);
        if let Some(total) = self.total_size {
            size(&mut b, total);
        }
        size(&mut b, self.offset);
        size(&mut b, self.rows.len() as u64);
        write_vlq(&mut b, self.sorts.len() as u64);
        for &(id, flags) in &self.sorts {
            b.extend_from_slice(&id.to_le_bytes());
            b.extend_from_slice(&flags.to_le_bytes());
        }
        write_vlq(&mut b, self.props.len() as u64);
        for &(id, flags, tag) in &self.props {
            b.extend_from_slice(&id.to_le_bytes());
            b.extend_from_slice(&flags.to_le_bytes());
            b.push(tag);
        }
        for row in &self.rows {
            b.extend_from_slice(row);
        }
        b
    }
}

#[test]
fn test_connect_to_missing_endpoint_is_not_found() {
    let dir = TempDir::new().unwrap();
    let err = Client::connect_path(&dir.path().join("nope.sock")).unwrap_err();
    assert!(matches!(err, Error::NotFound));
}

#[test]
fn test_scalar_version_roundtrip() {
    let (_dir, path, daemon) = serve(|mut stream| {
        let (code, payload) = read_request(&mut stream).unwrap();
        assert_eq!(code, request::GET_MAJOR_VERSION);
        assert!(payload.is_empty());
        send_message(&mut stream, response::OK, &7u32.to_le_bytes());
    });

    let client = Client::connect_path(&path).unwrap();
    assert_eq!(client.major_version().unwrap(), 7);
    daemon.join().unwrap();
}

#[test]
fn test_error_reply_is_drained_and_stream_stays_synchronized() {
    let (_dir, path, daemon) = serve(|mut stream| {
        let (code, _) = read_request(&mut stream).unwrap();
        assert_eq!(code, request::FIND_PROPERTY_FROM_NAME);
        // error payload must be consumed by the client before the next request
        send_message(&mut stream, response::NOT_FOUND, b"no such property");

        let (code, _) = read_request(&mut stream).unwrap();
        assert_eq!(code, request::IS_DB_LOADED);
        send_message(&mut stream, response::OK, &[1]);
    });

    let client = Client::connect_path(&path).unwrap();
    assert!(matches!(client.find_property("nope").unwrap_err(), Error::NotFound));
    assert!(client.is_db_loaded().unwrap());
    daemon.join().unwrap();
}

#[test]
fn test_empty_search_decodes_empty_result_list() {
    let (_dir, path, daemon) = serve(|mut stream| {
        let (code, _) = read_request(&mut stream).unwrap();
        assert_eq!(code, request::SEARCH);
        let reply = ResultReply {
            wide: true,
            folders: 3,
            files: 11,
            total_size: None,
            offset: 0,
            sorts: vec![],
            props: vec![],
            rows: vec![],
        };
        send_message(&mut stream, response::OK, &reply.encode());
    });

    let client = Client::connect_path(&path).unwrap();
    let state = SearchState::new();
    let results = client.search(&state).unwrap();
    assert_eq!(results.folder_count(), 3);
    assert_eq!(results.file_count(), 11);
    assert_eq!(results.row_count(), 0);
    assert_eq!(results.total_size(), None);
    assert!(matches!(
        results.lookup(1, PropertyRequestFlags::empty()),
        Err(Error::NotFound)
    ));
    daemon.join().unwrap();
}

const PROP_NAME: u32 = 2;
const PROP_SIZE: u32 = 3;
const PROP_ATTR: u32 = 4;
const PROP_EXTRA: u32 = 9;

fn typed_search_reply() -> ResultReply {
    // row records, in request order: name (formatted pstring), size, attr
    // dword, extra variant
    let mut row0 = vec![0x01u8]; // folder flag
    write_pstring(&mut row0, b"docs");
    row0.extend_from_slice(&u64::MAX.to_le_bytes()); // folder size unknown
    row0.extend_from_slice(&0x10u32.to_le_bytes());
    row0.push(6); // variant tag: u32
    row0.extend_from_slice(&42u32.to_le_bytes());

    let mut row1 = vec![0x00u8];
    write_pstring(&mut row1, b"report.pdf");
    row1.extend_from_slice(&123_456u64.to_le_bytes());
    row1.extend_from_slice(&0x20u32.to_le_bytes());
    row1.push(13); // variant tag: utf8 string
    write_pstring(&mut row1, b"hello");

    ResultReply {
        wide: true,
        folders: 1,
        files: 1,
        total_size: Some(123_456),
        offset: 0,
        sorts: vec![(PROP_NAME, 0)],
        props: vec![
            (PROP_NAME, PropertyRequestFlags::FORMAT.bits(), PropertyValueType::PString as u8),
            (PROP_SIZE, 0, PropertyValueType::Size as u8),
            (PROP_ATTR, 0, PropertyValueType::Dword as u8),
            (PROP_EXTRA, 0, PropertyValueType::Variant as u8),
        ],
        rows: vec![row0, row1],
    }
}

fn typed_search_state() -> SearchState {
    let state = SearchState::new();
    state.set_text("report");
    state.set_flag(SearchFlags::TOTAL_SIZE, true);
    state.set_search_sort(PROP_NAME, false);
    state.add_property_request(PROP_NAME, PropertyRequestFlags::FORMAT);
    state.add_property_request(PROP_SIZE, PropertyRequestFlags::empty());
    state.add_property_request(PROP_ATTR, PropertyRequestFlags::empty());
    state.add_property_request(PROP_EXTRA, PropertyRequestFlags::empty());
    state
}

#[test]
fn test_typed_columns_roundtrip_over_chained_messages() {
    let (_dir, path, daemon) = serve(|mut stream| {
        let (code, _) = read_request(&mut stream).unwrap();
        assert_eq!(code, request::SEARCH);
        // small pieces force every field to straddle message boundaries
        send_chained(&mut stream, &typed_search_reply().encode(), 5);
    });

    let client = Client::connect_path(&path).unwrap();
    let results = client.search(&typed_search_state()).unwrap();

    assert_eq!(results.row_count(), 2);
    assert_eq!(results.total_size(), Some(123_456));
    assert_eq!(results.sorts().len(), 1);

    assert!(results.is_folder(0).unwrap());
    assert!(!results.is_folder(1).unwrap());

    let name0 = results.property_string(0, PROP_NAME, PropertyRequestFlags::FORMAT).unwrap();
    assert_eq!(name0.as_deref(), Some("docs"));
    let name1 = results.property_string(1, PROP_NAME, PropertyRequestFlags::FORMAT).unwrap();
    assert_eq!(name1.as_deref(), Some("report.pdf"));

    assert_eq!(results.property_size(0, PROP_SIZE).unwrap(), None);
    assert_eq!(results.property_size(1, PROP_SIZE).unwrap(), Some(123_456));
    assert_eq!(results.property_u32(0, PROP_ATTR).unwrap(), 0x10);
    assert_eq!(results.property_u32(1, PROP_ATTR).unwrap(), 0x20);
    assert_eq!(results.property_variant(0, PROP_EXTRA).unwrap(), PropertyVariant::U32(42));
    assert_eq!(
        results.property_variant(1, PROP_EXTRA).unwrap(),
        PropertyVariant::Utf8("hello".into())
    );

    // slot offsets are a running total after the flags byte
    let reqs = results.requests();
    assert_eq!(reqs[0].offset, 1);
    assert_eq!(reqs[1].offset, 1 + 8);
    assert_eq!(reqs[2].offset, 1 + 8 + 8);
    assert_eq!(reqs[3].offset, 1 + 8 + 8 + 4);

    daemon.join().unwrap();
}

#[test]
fn test_accessor_type_checks() {
    let (_dir, path, daemon) = serve(|mut stream| {
        let (_, _) = read_request(&mut stream).unwrap();
        send_message(&mut stream, response::OK, &typed_search_reply().encode());
    });

    let client = Client::connect_path(&path).unwrap();
    let results = client.search(&typed_search_state()).unwrap();

    // wrong accessor width is rejected, no implicit widening
    assert!(matches!(
        results.property_u64(0, PROP_ATTR),
        Err(Error::InvalidPropertyValueType)
    ));
    assert!(matches!(
        results.property_u32(0, PROP_SIZE),
        Err(Error::InvalidPropertyValueType)
    ));
    // property never requested
    assert!(matches!(results.property_u32(0, 77), Err(Error::NotFound)));
    // raw lookup of a formatted property without its flags misses
    assert!(matches!(
        results.property_u32(0, PROP_NAME),
        Err(Error::NotFound)
    ));
    // row out of range
    assert!(matches!(results.property_u32(9, PROP_ATTR), Err(Error::InvalidParameter)));

    // partial copy into a short buffer
    let mut small = [0u8; 4];
    assert!(matches!(
        results.property_string_into(1, PROP_NAME, PropertyRequestFlags::FORMAT, &mut small),
        Err(Error::InsufficientBuffer)
    ));
    assert_eq!(&small, b"repo");

    daemon.join().unwrap();
}

#[test]
fn test_narrow_mode_sizes_decode() {
    let (_dir, path, daemon) = serve(|mut stream| {
        let (_, _) = read_request(&mut stream).unwrap();
        let mut row = vec![0u8];
        row.extend_from_slice(&u32::MAX.to_le_bytes()); // narrow unknown size
        let reply = ResultReply {
            wide: false,
            folders: 0,
            files: 1,
            total_size: None,
            offset: 0,
            sorts: vec![],
            props: vec![(PROP_SIZE, 0, PropertyValueType::Size as u8)],
            rows: vec![row],
        };
        send_message(&mut stream, response::OK, &reply.encode());
    });

    let client = Client::connect_path(&path).unwrap();
    let state = SearchState::new();
    state.add_property_request(PROP_SIZE, PropertyRequestFlags::empty());
    let results = client.search(&state).unwrap();
    assert_eq!(results.file_count(), 1);
    // the narrow sentinel still reads back as unknown
    assert_eq!(results.property_size(0, PROP_SIZE).unwrap(), None);
    daemon.join().unwrap();
}

#[test]
fn test_plain_string_column_reads_without_flags() {
    let (_dir, path, daemon) = serve(|mut stream| {
        let (_, _) = read_request(&mut stream).unwrap();
        // a property the daemon resolves to a string with no request flags
        let mut row = vec![0u8];
        write_pstring(&mut row, b"notes.txt");
        let reply = ResultReply {
            wide: true,
            folders: 0,
            files: 1,
            total_size: None,
            offset: 0,
            sorts: vec![],
            props: vec![(PROP_NAME, 0, PropertyValueType::PString as u8)],
            rows: vec![row],
        };
        send_message(&mut stream, response::OK, &reply.encode());
    });

    let client = Client::connect_path(&path).unwrap();
    let state = SearchState::new();
    state.add_property_request(PROP_NAME, PropertyRequestFlags::empty());
    let results = client.search(&state).unwrap();

    let name = results
        .property_string(0, PROP_NAME, PropertyRequestFlags::empty())
        .unwrap();
    assert_eq!(name.as_deref(), Some("notes.txt"));

    let mut buf = [0u8; 16];
    let n = results
        .property_string_into(0, PROP_NAME, PropertyRequestFlags::empty(), &mut buf)
        .unwrap();
    assert_eq!(&buf[..n], b"notes.txt");
    daemon.join().unwrap();
}

#[test]
fn test_truncated_reply_discards_result_list() {
    let (_dir, path, daemon) = serve(|mut stream| {
        let (_, _) = read_request(&mut stream).unwrap();
        let body = typed_search_reply().encode();
        // final message ends mid-row
        send_message(&mut stream, response::OK, &body[..body.len() - 6]);
    });

    let client = Client::connect_path(&path).unwrap();
    let err = client.search(&typed_search_state()).unwrap_err();
    assert!(matches!(err, Error::BadResponse));
    daemon.join().unwrap();
}

#[test]
fn test_shutdown_aborts_blocked_wait_promptly() {
    let (_dir, path, daemon) = serve(|mut stream| {
        // accept the request, never reply, hold the socket open
        let _ = read_request(&mut stream);
        std::thread::sleep(Duration::from_secs(5));
    });

    let client = Client::connect_path(&path).unwrap();
    let shutdown = client.shutdown_handle();

    let waiter = std::thread::spawn(move || {
        let started = Instant::now();
        let result = client.wait_for_result_change();
        // fails fast afterwards too
        let later = client.is_db_loaded();
        (result, later, started.elapsed())
    });

    std::thread::sleep(Duration::from_millis(100));
    shutdown.shutdown();
    shutdown.shutdown(); // idempotent

    let (result, later, elapsed) = waiter.join().unwrap();
    assert!(matches!(result, Err(Error::Shutdown)));
    assert!(matches!(later, Err(Error::Shutdown)));
    assert!(elapsed < Duration::from_secs(2), "shutdown took {elapsed:?}");
    drop(daemon); // daemon thread is still sleeping; don't join it
}

#[test]
fn test_snapshot_enumeration() {
    let (_dir, path, daemon) = serve(|mut stream| {
        let (code, _) = read_request(&mut stream).unwrap();
        assert_eq!(code, request::GET_FIND_FIRST_FILE);
        let mut body = Vec::new();
        for (name, attr, size) in [("a.txt", 0x20u32, 10u64), ("sub", 0x10, u64::MAX)] {
            body.extend_from_slice(&attr.to_le_bytes());
            body.extend_from_slice(&size.to_le_bytes());
            body.extend_from_slice(&1u64.to_le_bytes());
            body.extend_from_slice(&2u64.to_le_bytes());
            body.extend_from_slice(&3u64.to_le_bytes());
            write_pstring(&mut body, name.as_bytes());
        }
        send_chained(&mut stream, &body, 11);
    });

    let client = Client::connect_path(&path).unwrap();
    let mut handle = client.find_first_file("/docs").unwrap();

    let first = handle.next().unwrap().unwrap();
    assert_eq!(first.name, "a.txt");
    assert_eq!(first.size, Some(10));
    let second = handle.next().unwrap().unwrap();
    assert_eq!(second.name, "sub");
    assert_eq!(second.size, None);
    assert!(handle.next().unwrap().is_none());
    daemon.join().unwrap();
}

#[test]
fn test_journal_streams_until_callback_declines() {
    let mask = JournalFields::CHANGE_ID
        | JournalFields::PATH
        | JournalFields::NAME
        | JournalFields::OLD_PATH
        | JournalFields::ATTRIBUTES;

    let (_dir, path, daemon) = serve(move |mut stream| {
        let (code, payload) = read_request(&mut stream).unwrap();
        assert_eq!(code, request::READ_JOURNAL);
        assert_eq!(payload, mask.bits().to_le_bytes());

        // record 1: file created, directory bit wrongly set on the wire
        let mut r = vec![0u8];
        r.extend_from_slice(&1u64.to_le_bytes());
        write_pstring(&mut r, b"/docs/a.txt");
        write_pstring(&mut r, b"a.txt");
        r.extend_from_slice(&0x30u32.to_le_bytes());
        send_message(&mut stream, response::MORE_DATA, &r);

        // record 2: folder moved, old path present, directory bit missing
        let mut r = vec![5u8];
        r.extend_from_slice(&2u64.to_le_bytes());
        write_pstring(&mut r, b"/docs/new");
        write_pstring(&mut r, b"new");
        write_pstring(&mut r, b"/docs/old");
        r.extend_from_slice(&0u32.to_le_bytes());
        send_message(&mut stream, response::MORE_DATA, &r);

        // record 3: file deleted
        let mut r = vec![6u8];
        r.extend_from_slice(&3u64.to_le_bytes());
        write_pstring(&mut r, b"/docs/b.txt");
        write_pstring(&mut r, b"b.txt");
        r.extend_from_slice(&0x20u32.to_le_bytes());
        send_message(&mut stream, response::MORE_DATA, &r);

        // hold the stream open until the client hangs up
        let _ = read_request(&mut stream);
    });

    let client = Client::connect_path(&path).unwrap();
    let mut seen = Vec::new();
    let err = client
        .read_journal(mask, |record| {
            seen.push(record.clone());
            seen.len() < 3
        })
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));

    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0].change_id, Some(1));
    assert_eq!(seen[0].path.as_deref(), Some("/docs/a.txt"));
    // directory bit corrected off for a file record
    assert_eq!(seen[0].attributes, Some(0x20));
    assert_eq!(seen[0].old_path, None);

    // directory bit corrected on for a folder record, old path carried
    assert_eq!(seen[1].attributes, Some(0x10));
    assert_eq!(seen[1].old_path.as_deref(), Some("/docs/old"));

    assert_eq!(seen[2].change_id, Some(3));
    drop(daemon);
}

#[test]
fn test_journal_info_roundtrip() {
    let (_dir, path, daemon) = serve(|mut stream| {
        let (code, _) = read_request(&mut stream).unwrap();
        assert_eq!(code, request::GET_JOURNAL_INFO);
        let mut body = vec![1u8];
        body.extend_from_slice(&0xAAu64.to_le_bytes());
        body.extend_from_slice(&5u64.to_le_bytes());
        body.extend_from_slice(&9u64.to_le_bytes());
        send_message(&mut stream, response::OK, &body);
    });

    let client = Client::connect_path(&path).unwrap();
    let info = client.journal_info().unwrap();
    assert!(info.enabled);
    assert_eq!(info.journal_id, 0xAA);
    assert_eq!(info.first_change_id, 5);
    assert_eq!(info.next_change_id, 9);
    daemon.join().unwrap();
}

#[test]
fn test_search_request_payload_layout() {
    let (_dir, path, daemon) = serve(|mut stream| {
        let (code, payload) = read_request(&mut stream).unwrap();
        assert_eq!(code, request::SEARCH);

        // flags
        let flags = u32::from_le_bytes(payload[0..4].try_into().unwrap());
        assert_ne!(flags & SearchFlags::MATCH_CASE.bits(), 0);
        assert_ne!(flags & SearchFlags::WIDE_TOTALS.bits(), 0);
        // text: short VLQ length then bytes
        assert_eq!(payload[4], 5);
        assert_eq!(&payload[5..10], b"query");
        // viewport, wide
        assert_eq!(u64::from_le_bytes(payload[10..18].try_into().unwrap()), 20);
        assert_eq!(u64::from_le_bytes(payload[18..26].try_into().unwrap()), 50);
        // one sort entry, one property request
        assert_eq!(payload[26], 1);
        assert_eq!(u32::from_le_bytes(payload[27..31].try_into().unwrap()), PROP_SIZE);

        let reply = ResultReply {
            wide: true,
            folders: 0,
            files: 0,
            total_size: None,
            offset: 20,
            sorts: vec![],
            props: vec![],
            rows: vec![],
        };
        send_message(&mut stream, response::OK, &reply.encode());
    });

    let client = Client::connect_path(&path).unwrap();
    let state = SearchState::new();
    state.set_text("query");
    state.set_flag(SearchFlags::MATCH_CASE, true);
    state.set_viewport(20, 50);
    state.add_sort(PROP_SIZE, true);
    state.add_property_request(PROP_ATTR, PropertyRequestFlags::empty());
    let results = client.search(&state).unwrap();
    assert_eq!(results.viewport(), (20, 0));
    daemon.join().unwrap();
}
