//! Cell encoding: a tagged variant instead of a single record with a
//! runtime "is this a pointer?" flag.

pub const LEAF_CELL_FRAMING: usize = 2 + 2; // keyLen u16 + valueLen u16
pub const INTERIOR_CELL_FRAMING: usize = 2 + 4; // keyLen u16 + childPage u32

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Leaf { key: Vec<u8>, value: Vec<u8> },
    Interior { key: Vec<u8>, child: u32 },
}

impl Cell {
    pub fn key(&self) -> &[u8] {
        match self {
            Cell::Leaf { key, .. } => key,
            Cell::Interior { key, .. } => key,
        }
    }

    /// Total on-page size of this cell, including its own length framing.
    pub fn encoded_len(&self) -> usize {
        match self {
            Cell::Leaf { key, value } => LEAF_CELL_FRAMING + key.len() + value.len(),
            Cell::Interior { key, .. } => INTERIOR_CELL_FRAMING + key.len(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        match self {
            Cell::Leaf { key, value } => {
                out.extend_from_slice(&(key.len() as u16).to_be_bytes());
                out.extend_from_slice(key);
                out.extend_from_slice(&(value.len() as u16).to_be_bytes());
                out.extend_from_slice(value);
            }
            Cell::Interior { key, child } => {
                out.extend_from_slice(&(key.len() as u16).to_be_bytes());
                out.extend_from_slice(key);
                out.extend_from_slice(&child.to_be_bytes());
            }
        }
        out
    }

    /// Decodes a cell starting at `buf`'s first byte. `is_leaf` selects the
    /// framing since the same offset-addressed bytes mean different things
    /// on leaf vs. interior pages.
    pub fn decode(buf: &[u8], is_leaf: bool) -> Self {
        let key_len = u16::from_be_bytes(buf[0..2].try_into().unwrap()) as usize;
        let key = buf[2..2 + key_len].to_vec();
        if is_leaf {
            let val_off = 2 + key_len;
            let value_len =
                u16::from_be_bytes(buf[val_off..val_off + 2].try_into().unwrap()) as usize;
            let value = buf[val_off + 2..val_off + 2 + value_len].to_vec();
            Cell::Leaf { key, value }
        } else {
            let child_off = 2 + key_len;
            let child = u32::from_be_bytes(buf[child_off..child_off + 4].try_into().unwrap());
            Cell::Interior { key, child }
        }
    }

    /// The size, in bytes, a would-be leaf cell with this key/value would
    /// occupy on a page. Used before a cell object exists yet (insert path).
    pub fn leaf_size(key: &[u8], value: &[u8]) -> usize {
        LEAF_CELL_FRAMING + key.len() + value.len()
    }

    pub fn interior_size(key: &[u8]) -> usize {
        INTERIOR_CELL_FRAMING + key.len()
    }
}
