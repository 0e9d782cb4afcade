//! Address block partitioning for head/tail compression
//!
//! The wire format permits many valid encodings of the same address
//! list. For interoperability with the reference encoder the greedy
//! rule is: keep extending the current block while every address in it
//! still shares at least one common head or tail octet, otherwise
//! close the block and start a new one. Single addresses are emitted
//! uncompressed.

use std::ops::Range;

use types::Address;

/// Maximum addresses one block can carry (8-bit count).
const MAX_BLOCK_ADDRS: usize = 255;

/// One address block in the outgoing message: the covered range of the
/// address list plus the shared head/tail widths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BlockSpan {
    pub range: Range<usize>,
    pub head_len: usize,
    pub tail_len: usize,
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn common_suffix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().rev().zip(b.iter().rev()).take_while(|(x, y)| x == y).count()
}

/// Split an address list (all of one length) into blocks.
pub(crate) fn partition(addrs: &[Address]) -> Vec<BlockSpan> {
    let mut spans = Vec::new();
    let mut start = 0;

    while start < addrs.len() {
        let first = addrs[start].as_bytes();
        let addr_len = first.len();
        let mut head = addr_len;
        let mut tail = addr_len;
        let mut end = start + 1;

        while end < addrs.len() && end - start < MAX_BLOCK_ADDRS {
            let next = addrs[end].as_bytes();
            let h = head.min(common_prefix_len(first, next));
            let mut t = tail.min(common_suffix_len(first, next));
            if h + t > addr_len {
                t = addr_len - h;
            }
            if h == addr_len {
                t = 0;
            }
            if h + t == 0 {
                break;
            }
            head = h;
            tail = t;
            end += 1;
        }

        if end - start == 1 {
            spans.push(BlockSpan {
                range: start..end,
                head_len: 0,
                tail_len: 0,
            });
        } else {
            spans.push(BlockSpan {
                range: start..end,
                head_len: head,
                tail_len: tail,
            });
        }
        start = end;
    }

    spans
}
