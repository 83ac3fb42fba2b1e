//! DMP mix-point addressing.
//!
//! An audio processor exposes its routing matrix as numbered mix points.
//! Each routing table starts at a fixed base address; rows are sources and
//! columns are destinations:
//!
//! ```text
//! address = base + 100 * row + col
//! ```
//!
//! The input token names the table and the source (`MicToOut3`,
//! `VRetToSendC`); the output token is the destination (`4`, `B`). Numbered
//! ports are 1-based, lettered ports run `A`..=`H`. Magnitudes are not
//! bounds-checked; the unit answers an invalid address with an error code.
//! Only tokens whose address does not fit in an `i64` are rejected.

use sislib_core::{Error, Result};

/// How a port is named in a mix-point token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    /// 1-based decimal index.
    Number,
    /// Single letter `A`..=`H`.
    Letter,
}

impl PortKind {
    /// Convert a port token into a 0-based index.
    pub fn index(&self, token: &str) -> Result<i64> {
        match self {
            PortKind::Number => token
                .parse::<i64>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .ok_or_else(|| Error::Argument(format!("port number expected, got '{token}'"))),
            PortKind::Letter => match token.as_bytes() {
                [c @ b'A'..=b'H'] => Ok(i64::from(c - b'A')),
                _ => Err(Error::Argument(format!("port A-H expected, got '{token}'"))),
            },
        }
    }
}

/// One of the eight DMP routing tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MixTable {
    MicToOut,
    VRetToOut,
    ExpInToOut,
    MicToSend,
    VRetToSend,
    ExpInToSend,
    MicToExpOut,
    VRetToExpOut,
}

impl MixTable {
    pub const ALL: [MixTable; 8] = [
        MixTable::MicToOut,
        MixTable::VRetToOut,
        MixTable::ExpInToOut,
        MixTable::MicToSend,
        MixTable::VRetToSend,
        MixTable::ExpInToSend,
        MixTable::MicToExpOut,
        MixTable::VRetToExpOut,
    ];

    /// Token prefix naming the table.
    pub fn prefix(&self) -> &'static str {
        match self {
            MixTable::MicToOut => "MicToOut",
            MixTable::VRetToOut => "VRetToOut",
            MixTable::ExpInToOut => "EXPInToOut",
            MixTable::MicToSend => "MicToSend",
            MixTable::VRetToSend => "VRetToSend",
            MixTable::ExpInToSend => "EXPInToSend",
            MixTable::MicToExpOut => "MicToEXPOut",
            MixTable::VRetToExpOut => "VRetToEXPOut",
        }
    }

    /// Address of row 0, column 0.
    pub fn base(&self) -> i64 {
        match self {
            MixTable::MicToOut => 20000,
            MixTable::VRetToOut => 21300,
            MixTable::ExpInToOut => 22100,
            MixTable::MicToSend => 20009,
            MixTable::VRetToSend => 21309,
            MixTable::ExpInToSend => 22109,
            MixTable::MicToExpOut => 20018,
            MixTable::VRetToExpOut => 21317,
        }
    }

    pub fn source(&self) -> PortKind {
        match self {
            MixTable::VRetToOut | MixTable::VRetToSend | MixTable::VRetToExpOut => PortKind::Letter,
            _ => PortKind::Number,
        }
    }

    pub fn destination(&self) -> PortKind {
        match self {
            MixTable::MicToSend | MixTable::VRetToSend | MixTable::ExpInToSend => PortKind::Letter,
            _ => PortKind::Number,
        }
    }

    /// Split an input token into its table and source part.
    pub fn split(input: &str) -> Result<(MixTable, &str)> {
        MixTable::ALL
            .into_iter()
            .find_map(|t| input.strip_prefix(t.prefix()).map(|rest| (t, rest)))
            .ok_or_else(|| Error::Argument(format!("unknown mix-point source '{input}'")))
    }
}

/// A resolved matrix crosspoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixPoint {
    table: MixTable,
    row: i64,
    col: i64,
    address: i64,
}

impl MixPoint {
    /// Resolve an (input, output) token pair.
    ///
    /// Fails with `Error::Argument` when the address does not fit in an
    /// `i64`.
    ///
    /// # Example
    ///
    /// ```
    /// use sislib_extron::mixpoint::MixPoint;
    ///
    /// assert_eq!(MixPoint::resolve("MicToOut3", "4").unwrap().address(), 20203);
    /// assert_eq!(MixPoint::resolve("VRetToSendC", "B").unwrap().address(), 21510);
    /// ```
    pub fn resolve(input: &str, output: &str) -> Result<MixPoint> {
        let (table, source) = MixTable::split(input)?;
        let row = table.source().index(source)?;
        let col = table.destination().index(output)?;
        let address = row
            .checked_mul(100)
            .and_then(|r| r.checked_add(table.base()))
            .and_then(|a| a.checked_add(col))
            .ok_or_else(|| {
                Error::Argument(format!("mix point {input} -> {output} is out of range"))
            })?;
        Ok(MixPoint { table, row, col, address })
    }

    pub fn table(&self) -> MixTable {
        self.table
    }

    /// 0-based source index.
    pub fn row(&self) -> i64 {
        self.row
    }

    /// 0-based destination index.
    pub fn col(&self) -> i64 {
        self.col
    }

    pub fn address(&self) -> i64 {
        self.address
    }
}

impl std::fmt::Display for MixPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.address())
    }
}

/// Shorthand for `MixPoint::resolve(input, output)?.address()`.
pub fn mix_point_address(input: &str, output: &str) -> Result<i64> {
    Ok(MixPoint::resolve(input, output)?.address())
}
