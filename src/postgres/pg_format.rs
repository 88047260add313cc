/// Postgres data transmission format.
///
/// This library sends binary for every parameter and requests binary for
/// every result column; text shows up only in row descriptions produced by
/// a statement level `Describe`.
///
/// <https://www.postgresql.org/docs/current/protocol-overview.html#PROTOCOL-FORMAT-CODES>
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PgFormat {
    /// Text has format code zero.
    ///
    /// The transmitted representation carries no trailing nul character and
    /// does not allow embedded nuls.
    Text,
    /// Binary has format code one.
    ///
    /// Binary representations for integers use network byte order (most
    /// significant byte first).
    Binary,
}

impl PgFormat {
    /// Return format code for current format.
    pub fn format_code(&self) -> u16 {
        match self {
            PgFormat::Text => 0,
            PgFormat::Binary => 1,
        }
    }

    /// Format for a wire format code, unknown codes fall back to text.
    pub fn from_code(code: u16) -> PgFormat {
        match code {
            1 => PgFormat::Binary,
            _ => PgFormat::Text,
        }
    }
}
