use std::fmt;
use std::str::FromStr;

/// A byte-range reference into an opaque blob, written
/// `<blobId>,<start>,<end>` with `end` exclusive.
///
/// Opaque blob ids never contain a comma, so the presence of one is what
/// distinguishes a range reference from a plain id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRef {
    pub blob_id: String,
    pub start: u64,
    pub end: u64,
}

impl RangeRef {
    pub fn new(blob_id: impl Into<String>, start: u64, end: u64) -> Self {
        Self {
            blob_id: blob_id.into(),
            start,
            end,
        }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when `id` is a range reference rather than an opaque blob id.
    pub fn is_range_id(id: &str) -> bool {
        id.contains(',')
    }
}

impl fmt::Display for RangeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.blob_id, self.start, self.end)
    }
}

impl FromStr for RangeRef {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.split(',');
        let blob_id = fields.next().filter(|v| !v.is_empty()).ok_or("empty blob id")?;
        let start = fields
            .next()
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or("bad start offset")?;
        let end = fields
            .next()
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or("bad end offset")?;
        if fields.next().is_some() {
            return Err("trailing fields");
        }
        if end < start {
            return Err("end before start");
        }
        Ok(RangeRef::new(blob_id, start, end))
    }
}
