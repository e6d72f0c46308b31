//! High-level client: one method per daemon request.
//!
//! Every method blocks the calling thread until its reply is fully consumed
//! or an error occurs; requests on one client are serialized by the
//! connection lock. A [`ShutdownHandle`] cloned from the client aborts any
//! blocked method from another thread.

use crate::error::{Error, Result};
use crate::journal::{self, JournalFields, JournalInfo, JournalRecord};
use crate::protocol::codec::{write_pstring, WireRead};
use crate::protocol::{request, SIZE_UNKNOWN};
use crate::result::{decode, ResultList};
use crate::search::SearchState;
use crate::snapshot::FindHandle;
use crate::transport::{Connection, ShutdownHandle};
use crate::variant::PropertyValueType;
use std::path::Path;

/// Attributes sentinel for "not indexed"
const ATTRIBUTES_UNKNOWN: u32 = u32::MAX;

/// Extended file attributes, with `None` for unindexed fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttributesEx {
    pub attributes: Option<u32>,
    pub size: Option<u64>,
    pub date_created: Option<u64>,
    pub date_accessed: Option<u64>,
    pub date_modified: Option<u64>,
}

/// Client for the file-search daemon
#[derive(Debug)]
pub struct Client {
    conn: Connection,
}

impl Client {
    /// Connect to the daemon, optionally to a named instance.
    /// Fails with [`Error::NotFound`] when no daemon serves the endpoint.
    pub fn connect(instance: Option<&str>) -> Result<Self> {
        Ok(Self { conn: Connection::connect(instance)? })
    }

    /// Connect to an explicit endpoint path (tests, unusual deployments)
    pub fn connect_path(path: &Path) -> Result<Self> {
        Ok(Self { conn: Connection::connect_path(path)? })
    }

    /// Cloneable handle that aborts in-flight and future calls from any thread
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.conn.shutdown_handle()
    }

    /// Signal shutdown on this connection
    pub fn shutdown(&self) {
        self.conn.shutdown_handle().shutdown();
    }

    fn scalar_u32(&self, code: u32, payload: &[u8]) -> Result<u32> {
        let mut stream = self.conn.exchange(code, payload)?;
        let v = stream.read_u32();
        stream.finish()?;
        Ok(v)
    }

    fn scalar_u64(&self, code: u32, payload: &[u8]) -> Result<u64> {
        let mut stream = self.conn.exchange(code, payload)?;
        let v = stream.read_u64();
        stream.finish()?;
        Ok(v)
    }

    fn scalar_bool(&self, code: u32, payload: &[u8]) -> Result<bool> {
        let mut stream = self.conn.exchange(code, payload)?;
        let v = stream.read_u8();
        stream.finish()?;
        Ok(v != 0)
    }

    fn scalar_string(&self, code: u32, payload: &[u8]) -> Result<String> {
        let mut stream = self.conn.exchange(code, payload)?;
        let len = stream.read_vlq();
        if len > 1 << 20 {
            stream.mark_bad();
        }
        let mut bytes = vec![0u8; len.min(1 << 20) as usize];
        stream.read_exact_or_zero(&mut bytes);
        stream.finish()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn pstring_payload(text: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(text.len() + 3);
        write_pstring(&mut buf, text.as_bytes());
        buf
    }

    // ---- version queries ----

    pub fn pipe_version(&self) -> Result<u32> {
        self.scalar_u32(request::GET_PIPE_VERSION, &[])
    }

    pub fn major_version(&self) -> Result<u32> {
        self.scalar_u32(request::GET_MAJOR_VERSION, &[])
    }

    pub fn minor_version(&self) -> Result<u32> {
        self.scalar_u32(request::GET_MINOR_VERSION, &[])
    }

    pub fn revision(&self) -> Result<u32> {
        self.scalar_u32(request::GET_REVISION, &[])
    }

    pub fn build_number(&self) -> Result<u32> {
        self.scalar_u32(request::GET_BUILD, &[])
    }

    // ---- property catalog ----

    /// Resolve a property name to its id; [`Error::NotFound`] if unknown
    pub fn find_property(&self, name: &str) -> Result<u32> {
        self.scalar_u32(request::FIND_PROPERTY_FROM_NAME, &Self::pstring_payload(name))
    }

    pub fn property_name(&self, property_id: u32) -> Result<String> {
        self.scalar_string(request::GET_PROPERTY_NAME, &property_id.to_le_bytes())
    }

    /// Default value type the daemon resolves this property to
    pub fn property_type(&self, property_id: u32) -> Result<PropertyValueType> {
        let mut stream = self
            .conn
            .exchange(request::GET_PROPERTY_TYPE, &property_id.to_le_bytes())?;
        let tag = stream.read_u8();
        stream.finish()?;
        PropertyValueType::from_tag(tag).ok_or(Error::BadResponse)
    }

    // ---- daemon state checks ----

    pub fn is_db_loaded(&self) -> Result<bool> {
        self.scalar_bool(request::IS_DB_LOADED, &[])
    }

    pub fn is_property_indexed(&self, property_id: u32) -> Result<bool> {
        self.scalar_bool(request::IS_PROPERTY_INDEXED, &property_id.to_le_bytes())
    }

    pub fn is_property_fast_sort(&self, property_id: u32) -> Result<bool> {
        self.scalar_bool(request::IS_PROPERTY_FAST_SORT, &property_id.to_le_bytes())
    }

    /// Has the result set changed since the last search?
    pub fn is_result_change(&self) -> Result<bool> {
        self.scalar_bool(request::IS_RESULT_CHANGE, &[])
    }

    /// Block until the daemon reports a result change. Abort with the
    /// shutdown handle.
    pub fn wait_for_result_change(&self) -> Result<()> {
        let stream = self.conn.exchange(request::WAIT_FOR_RESULT_CHANGE, &[])?;
        stream.finish()
    }

    // ---- run counts ----

    pub fn run_count(&self, filename: &str) -> Result<u32> {
        self.scalar_u32(request::GET_RUN_COUNT, &Self::pstring_payload(filename))
    }

    /// Set the run count; returns the stored value
    pub fn set_run_count(&self, filename: &str, count: u32) -> Result<u32> {
        let mut payload = Self::pstring_payload(filename);
        payload.extend_from_slice(&count.to_le_bytes());
        self.scalar_u32(request::SET_RUN_COUNT, &payload)
    }

    /// Increment the run count; returns the new value
    pub fn inc_run_count(&self, filename: &str) -> Result<u32> {
        self.scalar_u32(request::INC_RUN_COUNT, &Self::pstring_payload(filename))
    }

    // ---- per-item queries ----

    /// Indexed size of a folder; `None` when the daemon does not know it
    pub fn folder_size(&self, path: &str) -> Result<Option<u64>> {
        match self.scalar_u64(request::GET_FOLDER_SIZE, &Self::pstring_payload(path))? {
            SIZE_UNKNOWN => Ok(None),
            v => Ok(Some(v)),
        }
    }

    /// Indexed attributes of a file; `None` when not indexed
    pub fn file_attributes(&self, path: &str) -> Result<Option<u32>> {
        match self.scalar_u32(request::GET_FILE_ATTRIBUTES, &Self::pstring_payload(path))? {
            ATTRIBUTES_UNKNOWN => Ok(None),
            v => Ok(Some(v)),
        }
    }

    pub fn file_attributes_ex(&self, path: &str) -> Result<FileAttributesEx> {
        let mut stream = self
            .conn
            .exchange(request::GET_FILE_ATTRIBUTES_EX, &Self::pstring_payload(path))?;
        let attributes = stream.read_u32();
        let size = stream.read_u64();
        let date_created = stream.read_u64();
        let date_accessed = stream.read_u64();
        let date_modified = stream.read_u64();
        stream.finish()?;

        let opt = |v: u64| if v == SIZE_UNKNOWN { None } else { Some(v) };
        Ok(FileAttributesEx {
            attributes: if attributes == ATTRIBUTES_UNKNOWN { None } else { Some(attributes) },
            size: opt(size),
            date_created: opt(date_created),
            date_accessed: opt(date_accessed),
            date_modified: opt(date_modified),
        })
    }

    /// Enumerate one directory from the daemon's index
    pub fn find_first_file(&self, path: &str) -> Result<FindHandle> {
        let mut stream = self
            .conn
            .exchange(request::GET_FIND_FIRST_FILE, &Self::pstring_payload(path))?;
        let handle = FindHandle::read_from(&mut stream);
        stream.finish()?;
        Ok(handle)
    }

    // ---- search ----

    /// Run the search described by `state` and decode the reply
    pub fn search(&self, state: &SearchState) -> Result<ResultList> {
        self.query(request::SEARCH, state)
    }

    /// Re-sort the daemon's current result set
    pub fn sort(&self, state: &SearchState) -> Result<ResultList> {
        self.query(request::SORT, state)
    }

    /// Re-fetch the viewport from the daemon's current result set
    pub fn get_results(&self, state: &SearchState) -> Result<ResultList> {
        self.query(request::GET_RESULTS, state)
    }

    fn query(&self, code: u32, state: &SearchState) -> Result<ResultList> {
        let snapshot = state.snapshot();
        let payload = snapshot.encode();
        let total_size = snapshot.flags.contains(crate::search::SearchFlags::TOTAL_SIZE);

        let mut stream = self.conn.exchange(code, &payload)?;
        let list = decode::decode_result_list(&mut stream, total_size);
        stream.finish()?;
        Ok(list)
    }

    // ---- journal ----

    pub fn journal_info(&self) -> Result<JournalInfo> {
        let mut stream = self.conn.exchange(request::GET_JOURNAL_INFO, &[])?;
        let enabled = stream.read_u8() != 0;
        let journal_id = stream.read_u64();
        let first_change_id = stream.read_u64();
        let next_change_id = stream.read_u64();
        stream.finish()?;
        Ok(JournalInfo { enabled, journal_id, first_change_id, next_change_id })
    }

    /// Stream change records forever, one callback per record.
    ///
    /// Consumes the client: the reply never terminates, so the connection
    /// cannot be reused afterwards. Returns [`Error::Cancelled`] when the
    /// callback declines to continue, [`Error::Shutdown`] when aborted via
    /// the shutdown handle.
    pub fn read_journal(
        self,
        mask: JournalFields,
        callback: impl FnMut(&JournalRecord) -> bool,
    ) -> Result<()> {
        let payload = mask.bits().to_le_bytes();
        let mut stream = self.conn.exchange(request::READ_JOURNAL, &payload)?;
        journal::run(&mut stream, mask, callback)
    }
}
