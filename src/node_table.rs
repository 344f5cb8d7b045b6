//! Binary search tree node tables
//!
//! A node table is a flat array of nodes. Each node holds two records, one
//! per address bit (0 then 1), packed big-endian at 24, 28 or 32 bits. A
//! record value `v` in a table of `node_count` nodes means:
//!
//! - `v < node_count`: continue at node `v`
//! - `v == node_count`: no data for this address
//! - `v >= node_count + 16`: data at value-pool offset `v - node_count - 16`
//!
//! Values in between are never written and rejected on read.

use crate::error::{MergeError, Result};
use crate::network::bit_at;

/// Gap between the "not found" marker and the first data pointer value
pub const DATA_POINTER_BIAS: u32 = 16;

/// Record size in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecordSize {
    /// 24-bit records (3 bytes per record, 6 bytes per node)
    Bits24 = 24,
    /// 28-bit records (3.5 bytes per record, 7 bytes per node)
    Bits28 = 28,
    /// 32-bit records (4 bytes per record, 8 bytes per node)
    Bits32 = 32,
}

impl RecordSize {
    /// Get the size of a node (2 records) in bytes
    pub fn node_bytes(self) -> usize {
        match self {
            RecordSize::Bits24 => 6,
            RecordSize::Bits28 => 7,
            RecordSize::Bits32 => 8,
        }
    }

    /// Record width in bits
    pub fn bits(self) -> u16 {
        self as u16
    }

    /// Largest record value this size can hold
    pub fn max_value(self) -> u64 {
        (1u64 << self.bits()) - 1
    }

    /// Create from bit size
    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            24 => Some(RecordSize::Bits24),
            28 => Some(RecordSize::Bits28),
            32 => Some(RecordSize::Bits32),
            _ => None,
        }
    }

    /// Smallest record size able to hold `max_value`
    pub fn smallest_for(max_value: u64) -> Option<Self> {
        [RecordSize::Bits24, RecordSize::Bits28, RecordSize::Bits32]
            .into_iter()
            .find(|size| max_value <= size.max_value())
    }
}

/// One side of a node before it is packed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Child node index
    Node(u32),
    /// Value-pool offset
    Data(u32),
    /// No data
    Empty,
}

impl Slot {
    fn to_value(self, node_count: u32) -> u64 {
        match self {
            Slot::Node(id) => id as u64,
            Slot::Empty => node_count as u64,
            Slot::Data(offset) => node_count as u64 + DATA_POINTER_BIAS as u64 + offset as u64,
        }
    }
}

/// Largest record value a table of `node_count` nodes needs when its data
/// pointers reach offsets below `data_size`
pub fn max_record_value(node_count: u32, data_size: u32) -> u64 {
    node_count as u64 + DATA_POINTER_BIAS as u64 + data_size.saturating_sub(1) as u64
}

/// Pack `nodes` into `out`
///
/// # Errors
/// [`MergeError::Format`] if a child index is out of range or a record value
/// does not fit `record_size`.
pub fn write_node_table(nodes: &[[Slot; 2]], record_size: RecordSize, out: &mut Vec<u8>) -> Result<()> {
    let node_count = u32::try_from(nodes.len())
        .map_err(|_| MergeError::Format(format!("{} nodes exceed u32 range", nodes.len())))?;
    out.reserve(nodes.len() * record_size.node_bytes());

    for (id, node) in nodes.iter().enumerate() {
        let mut values = [0u32; 2];
        for (side, slot) in node.iter().enumerate() {
            if let Slot::Node(child) = slot {
                if *child >= node_count || *child == 0 {
                    return Err(MergeError::Format(format!(
                        "node {} points at invalid child {}",
                        id, child
                    )));
                }
            }
            let value = slot.to_value(node_count);
            if value > record_size.max_value() {
                return Err(MergeError::Format(format!(
                    "record value {} does not fit {}-bit records",
                    value,
                    record_size.bits()
                )));
            }
            values[side] = value as u32;
        }
        write_node(values[0], values[1], record_size, out);
    }
    Ok(())
}

fn write_node(left: u32, right: u32, record_size: RecordSize, out: &mut Vec<u8>) {
    match record_size {
        RecordSize::Bits24 => {
            out.extend_from_slice(&left.to_be_bytes()[1..]);
            out.extend_from_slice(&right.to_be_bytes()[1..]);
        }
        RecordSize::Bits28 => {
            // [left low 24][left high 4 | right high 4][right low 24]
            out.extend_from_slice(&left.to_be_bytes()[1..]);
            out.push((((left >> 24) & 0x0F) as u8) << 4 | ((right >> 24) & 0x0F) as u8);
            out.extend_from_slice(&right.to_be_bytes()[1..]);
        }
        RecordSize::Bits32 => {
            out.extend_from_slice(&left.to_be_bytes());
            out.extend_from_slice(&right.to_be_bytes());
        }
    }
}

/// Outcome of walking a node table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeWalk {
    /// Reached a data record after `depth` bits
    Data {
        /// Value-pool offset
        offset: u32,
        /// Number of bits consumed (prefix length of the match)
        depth: u8,
    },
    /// Reached the "not found" marker after `depth` bits
    NotFound {
        /// Number of bits consumed
        depth: u8,
    },
    /// Ran out of bits while still inside the tree
    Node(u32),
}

/// Read-only view of a packed node table
#[derive(Debug, Clone, Copy)]
pub struct NodeTable<'a> {
    data: &'a [u8],
    node_count: u32,
    record_size: RecordSize,
}

impl<'a> NodeTable<'a> {
    /// View the first `node_count` nodes of `data`
    ///
    /// # Errors
    /// [`MergeError::Format`] if `data` is shorter than the table.
    pub fn new(data: &'a [u8], node_count: u32, record_size: RecordSize) -> Result<Self> {
        let table_size = node_count as usize * record_size.node_bytes();
        if data.len() < table_size {
            return Err(MergeError::Format(format!(
                "node table needs {} bytes, only {} available",
                table_size,
                data.len()
            )));
        }
        Ok(Self {
            data: &data[..table_size],
            node_count,
            record_size,
        })
    }

    /// Number of nodes
    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    /// Record size of the table
    pub fn record_size(&self) -> RecordSize {
        self.record_size
    }

    /// Table size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Raw record value of `side` (0 or 1) of `node`
    pub fn read_record(&self, node: u32, side: usize) -> Result<u32> {
        if node >= self.node_count {
            return Err(MergeError::Format(format!(
                "node index {} exceeds node count {}",
                node, self.node_count
            )));
        }
        let size = self.record_size.node_bytes();
        let start = node as usize * size;
        let bytes = &self.data[start..start + size];

        let value = match self.record_size {
            RecordSize::Bits24 => {
                let b = &bytes[side * 3..side * 3 + 3];
                u32::from_be_bytes([0, b[0], b[1], b[2]])
            }
            RecordSize::Bits28 => {
                let (high, b) = if side == 0 {
                    ((bytes[3] >> 4) & 0x0F, &bytes[0..3])
                } else {
                    (bytes[3] & 0x0F, &bytes[4..7])
                };
                u32::from_be_bytes([high, b[0], b[1], b[2]])
            }
            RecordSize::Bits32 => {
                let b = &bytes[side * 4..side * 4 + 4];
                u32::from_be_bytes([b[0], b[1], b[2], b[3]])
            }
        };
        Ok(value)
    }

    /// Follow `bits` bits of the left-aligned `key`, starting at `start`
    pub fn walk(&self, key: u128, start: u32, bits: u8) -> Result<TreeWalk> {
        if self.node_count == 0 {
            return Ok(TreeWalk::NotFound { depth: 0 });
        }

        let mut node = start;
        for depth in 0..bits {
            let record = self.read_record(node, bit_at(key, depth))?;
            if record < self.node_count {
                node = record;
            } else if record == self.node_count {
                return Ok(TreeWalk::NotFound { depth: depth + 1 });
            } else {
                let offset = record
                    .checked_sub(self.node_count + DATA_POINTER_BIAS)
                    .ok_or_else(|| {
                        MergeError::Format(format!(
                            "record {} falls between the not-found marker and the data range",
                            record
                        ))
                    })?;
                return Ok(TreeWalk::Data {
                    offset,
                    depth: depth + 1,
                });
            }
        }
        Ok(TreeWalk::Node(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(record_size: RecordSize) {
        let nodes = [
            [Slot::Node(1), Slot::Data(0)],
            [Slot::Empty, Slot::Data(300_000)],
        ];
        let mut out = Vec::new();
        write_node_table(&nodes, record_size, &mut out).unwrap();
        assert_eq!(out.len(), 2 * record_size.node_bytes());

        let table = NodeTable::new(&out, 2, record_size).unwrap();
        assert_eq!(table.read_record(0, 0).unwrap(), 1);
        assert_eq!(table.read_record(0, 1).unwrap(), 2 + 16);
        assert_eq!(table.read_record(1, 0).unwrap(), 2);
        assert_eq!(table.read_record(1, 1).unwrap(), 2 + 16 + 300_000);
    }

    #[test]
    fn test_record_sizes() {
        round_trip(RecordSize::Bits24);
        round_trip(RecordSize::Bits28);
        round_trip(RecordSize::Bits32);
    }

    #[test]
    fn test_28bit_high_nibbles() {
        let nodes = [[Slot::Data(0x0ABC_DEF0 - 17), Slot::Data(0x0123_4567 - 17)]];
        let mut out = Vec::new();
        write_node_table(&nodes, RecordSize::Bits28, &mut out).unwrap();
        assert_eq!(out[3], 0xA1);
        let table = NodeTable::new(&out, 1, RecordSize::Bits28).unwrap();
        assert_eq!(table.read_record(0, 0).unwrap(), 0x0ABC_DEF0);
        assert_eq!(table.read_record(0, 1).unwrap(), 0x0123_4567);
    }

    #[test]
    fn test_smallest_for() {
        assert_eq!(RecordSize::smallest_for(0xFF_FFFF), Some(RecordSize::Bits24));
        assert_eq!(RecordSize::smallest_for(0x100_0000), Some(RecordSize::Bits28));
        assert_eq!(RecordSize::smallest_for(0x1000_0000), Some(RecordSize::Bits32));
        assert_eq!(RecordSize::smallest_for(1 << 32), None);
    }

    #[test]
    fn test_value_too_large() {
        let nodes = [[Slot::Data(0xFF_FFFF), Slot::Empty]];
        let mut out = Vec::new();
        assert!(write_node_table(&nodes, RecordSize::Bits24, &mut out).is_err());
    }

    #[test]
    fn test_walk() {
        // 0/1 -> data 7 ; 1/1 -> node 1 ; 10/2 -> empty ; 11/2 -> data 9
        let nodes = [
            [Slot::Data(7), Slot::Node(1)],
            [Slot::Empty, Slot::Data(9)],
        ];
        let mut out = Vec::new();
        write_node_table(&nodes, RecordSize::Bits24, &mut out).unwrap();
        let table = NodeTable::new(&out, 2, RecordSize::Bits24).unwrap();

        let key = |top: u128| top << 126;
        assert_eq!(
            table.walk(key(0b01), 0, 128).unwrap(),
            TreeWalk::Data { offset: 7, depth: 1 }
        );
        assert_eq!(
            table.walk(key(0b10), 0, 128).unwrap(),
            TreeWalk::NotFound { depth: 2 }
        );
        assert_eq!(
            table.walk(key(0b11), 0, 128).unwrap(),
            TreeWalk::Data { offset: 9, depth: 2 }
        );
        assert_eq!(table.walk(key(0b10), 0, 1).unwrap(), TreeWalk::Node(1));
    }

    #[test]
    fn test_short_buffer() {
        assert!(NodeTable::new(&[0u8; 5], 1, RecordSize::Bits24).is_err());
    }
}
