//! In-memory longest-prefix-match tries
//!
//! Nodes live in an arena and are addressed by index. A record attached at
//! depth `n` covers the network formed by the first `n` bits of the path to
//! it. Lookups return the deepest record on the path of an address, so the
//! result never depends on insertion order.

use crate::error::{MergeError, Result};
use crate::network::{address_key, bit_at, prefix_mask, AddressFamily, Network};
use crate::record::AttributeRecord;
use std::net::IpAddr;

pub(crate) type NodeId = u32;

/// Index of the root node in every trie
pub(crate) const ROOT: NodeId = 0;

/// Arena node; records are held apart so path nodes stay small
#[derive(Debug, Clone, Copy)]
struct Node {
    /// Child for bit 0 and bit 1
    children: [Option<NodeId>; 2],
    /// Index into the record list
    record: Option<u32>,
}

impl Node {
    const EMPTY: Node = Node {
        children: [None, None],
        record: None,
    };
}

/// Binary trie for one address family
#[derive(Debug, Clone)]
pub struct IpTrie<T> {
    family: AddressFamily,
    nodes: Vec<Node>,
    records: Vec<T>,
}

impl<T> IpTrie<T> {
    /// Create an empty trie
    pub fn new(family: AddressFamily) -> Self {
        Self {
            family,
            nodes: vec![Node::EMPTY],
            records: Vec::new(),
        }
    }

    /// Address family of the trie
    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// Attach `record` to `network`, returning the record it replaced
    ///
    /// # Errors
    /// [`MergeError::ConflictingFamily`] if `network` is of the other family.
    pub fn insert(&mut self, network: &Network, record: T) -> Result<Option<T>> {
        if network.family() != self.family {
            return Err(MergeError::ConflictingFamily {
                expected: self.family,
                found: network.family(),
            });
        }

        let key = network.key();
        let mut node = ROOT;
        for depth in 0..network.prefix_len() {
            let bit = bit_at(key, depth);
            node = match self.nodes[node as usize].children[bit] {
                Some(child) => child,
                None => {
                    let child = self.allocate_node()?;
                    self.nodes[node as usize].children[bit] = Some(child);
                    child
                }
            };
        }

        match self.nodes[node as usize].record {
            Some(index) => Ok(Some(std::mem::replace(
                &mut self.records[index as usize],
                record,
            ))),
            None => {
                let index = u32::try_from(self.records.len())
                    .map_err(|_| MergeError::Format("trie record list exhausted".to_string()))?;
                self.records.push(record);
                self.nodes[node as usize].record = Some(index);
                Ok(None)
            }
        }
    }

    fn allocate_node(&mut self) -> Result<NodeId> {
        let id = NodeId::try_from(self.nodes.len())
            .map_err(|_| MergeError::Format("trie node arena exhausted".to_string()))?;
        self.nodes.push(Node::EMPTY);
        Ok(id)
    }

    /// Longest-prefix match for `addr`
    ///
    /// Returns `None` for addresses of the other family or when no inserted
    /// network covers `addr`.
    pub fn lookup(&self, addr: IpAddr) -> Option<(Network, &T)> {
        if AddressFamily::of(&addr) != self.family {
            return None;
        }

        let key = address_key(addr);
        let mut node = self.nodes[ROOT as usize];
        let mut best = node.record.map(|index| (0u8, index));

        for depth in 0..self.family.bit_width() {
            match node.children[bit_at(key, depth)] {
                Some(child) => {
                    node = self.nodes[child as usize];
                    if let Some(index) = node.record {
                        best = Some((depth + 1, index));
                    }
                }
                None => break,
            }
        }

        best.map(|(prefix_len, index)| {
            let base = key & prefix_mask(prefix_len, self.family);
            (
                Network::from_key(self.family, base, prefix_len),
                &self.records[index as usize],
            )
        })
    }

    /// Record attached to exactly `network`
    pub fn get(&self, network: &Network) -> Option<&T> {
        if network.family() != self.family {
            return None;
        }
        let key = network.key();
        let mut node = ROOT;
        for depth in 0..network.prefix_len() {
            node = self.nodes[node as usize].children[bit_at(key, depth)]?;
        }
        self.record(node)
    }

    /// Number of networks carrying a record
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if no network has been inserted
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of arena nodes, root included
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Pre-order iterator over `(network, record)` pairs, bit 0 before bit 1
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            trie: self,
            stack: vec![(ROOT, 0, 0)],
        }
    }

    pub(crate) fn children(&self, node: NodeId) -> [Option<NodeId>; 2] {
        self.nodes[node as usize].children
    }

    pub(crate) fn record(&self, node: NodeId) -> Option<&T> {
        self.nodes[node as usize]
            .record
            .map(|index| &self.records[index as usize])
    }
}

/// Iterator returned by [`IpTrie::iter`]
pub struct Iter<'a, T> {
    trie: &'a IpTrie<T>,
    /// Pending nodes with their key bits and depth
    stack: Vec<(NodeId, u128, u8)>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (Network, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((id, key, depth)) = self.stack.pop() {
            let node = &self.trie.nodes[id as usize];
            // Push 1 first so 0 pops first
            if let Some(child) = node.children[1] {
                self.stack
                    .push((child, key | (1u128 << (127 - depth as u32)), depth + 1));
            }
            if let Some(child) = node.children[0] {
                self.stack.push((child, key, depth + 1));
            }
            if let Some(record) = self.trie.record(id) {
                return Some((Network::from_key(self.trie.family, key, depth), record));
            }
        }
        None
    }
}

/// One trie per address family
#[derive(Debug, Clone)]
pub struct TrieStore<T = AttributeRecord> {
    v4: IpTrie<T>,
    v6: IpTrie<T>,
}

impl<T> Default for TrieStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TrieStore<T> {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            v4: IpTrie::new(AddressFamily::V4),
            v6: IpTrie::new(AddressFamily::V6),
        }
    }

    /// Insert into the trie of the network's family
    ///
    /// Inserting the same network again replaces its record.
    pub fn insert(&mut self, network: &Network, record: T) -> Result<()> {
        self.trie_mut(network.family()).insert(network, record)?;
        Ok(())
    }

    /// Longest-prefix match for `addr` in the trie of its family
    pub fn lookup(&self, addr: IpAddr) -> Option<(Network, &T)> {
        self.trie(AddressFamily::of(&addr)).lookup(addr)
    }

    /// Every stored network with its record: IPv4 first, then IPv6, each in
    /// pre-order
    pub fn traverse_ordered(&self) -> impl Iterator<Item = (Network, &T)> + '_ {
        self.v4.iter().chain(self.v6.iter())
    }

    /// Trie of one family
    pub fn trie(&self, family: AddressFamily) -> &IpTrie<T> {
        match family {
            AddressFamily::V4 => &self.v4,
            AddressFamily::V6 => &self.v6,
        }
    }

    fn trie_mut(&mut self, family: AddressFamily) -> &mut IpTrie<T> {
        match family {
            AddressFamily::V4 => &mut self.v4,
            AddressFamily::V6 => &mut self.v6,
        }
    }

    /// Total number of stored networks
    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    /// True if neither trie holds a network
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Arena size of the trie of one family
    pub fn node_count(&self, family: AddressFamily) -> usize {
        self.trie(family).node_count()
    }
}
