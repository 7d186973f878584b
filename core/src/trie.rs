//! Prefix tree over lexicon words for autocomplete.
//!
//! Children are kept in a `BTreeMap` so depth-first traversal visits them in
//! character order and completions come out sorted.

use std::collections::BTreeMap;

pub const DEFAULT_COMPLETION_LIMIT: usize = 10;

#[derive(Debug, Default, Clone)]
struct Node {
    children: BTreeMap<char, Node>,
    is_end: bool,
}

#[derive(Debug, Default, Clone)]
pub struct Trie {
    root: Node,
    len: usize,
}

impl Trie {
    pub fn new() -> Self { Self::default() }

    pub fn build<'a, I>(words: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut trie = Trie::new();
        for word in words {
            trie.insert(word);
        }
        trie
    }

    pub(crate) fn len(&self) -> usize { self.len }

    pub fn insert(&mut self, word: &str) {
        if word.is_empty() {
            return;
        }
        let mut node = &mut self.root;
        for ch in word.chars() {
            node = node.children.entry(ch).or_default();
        }
        if !node.is_end {
            node.is_end = true;
            self.len += 1;
        }
    }

    /// Up to `limit` words starting with `prefix`, in lexicographic order.
    pub fn complete(&self, prefix: &str, limit: usize) -> Vec<String> {
        let mut out = Vec::new();
        if limit == 0 {
            return out;
        }
        if let Some(node) = self.find(prefix) {
            let mut path = prefix.to_string();
            collect(node, &mut path, limit, &mut out);
        }
        out
    }

    fn find(&self, prefix: &str) -> Option<&Node> {
        let mut node = &self.root;
        for ch in prefix.chars() {
            node = node.children.get(&ch)?;
        }
        Some(node)
    }
}

fn collect(node: &Node, path: &mut String, limit: usize, out: &mut Vec<String>) {
    if out.len() >= limit {
        return;
    }
    if node.is_end {
        out.push(path.clone());
    }
    for (ch, child) in &node.children {
        if out.len() >= limit {
            return;
        }
        path.push(*ch);
        collect(child, path, limit, out);
        path.pop();
    }
}
