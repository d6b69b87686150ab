/// Minimal little-endian writer so tests can author synthetic containers.
pub(crate) struct Writer {
    pub buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn f32(&mut self, v: f32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// 1-byte length prefix, as the cursor reads it.
    pub fn string(&mut self, s: &str) -> &mut Self {
        self.u8(s.len() as u8);
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }
}

/// NUL-separated string table plus the byte offsets of each entry, for the
/// effect container layout.
pub(crate) fn string_table(entries: &[&str]) -> (Vec<u8>, Vec<u32>) {
    let mut table = Vec::new();
    let mut offsets = Vec::with_capacity(entries.len());
    for entry in entries {
        offsets.push(table.len() as u32);
        table.extend_from_slice(entry.as_bytes());
        table.push(0);
    }
    (table, offsets)
}
