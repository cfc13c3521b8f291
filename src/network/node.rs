use std::sync::RwLock;

/// A peer address known to this node.
#[derive(Clone)]
pub struct Node {
    addr: String,
}

impl Node {
    fn new(addr: String) -> Node {
        Node { addr }
    }

    pub fn get_addr(&self) -> String {
        self.addr.clone()
    }
}

/// The mutable set of reachable peers: seeded with the central node, grown
/// by `version` and `addr` messages, shrunk when a send fails.
pub struct Nodes {
    inner: RwLock<Vec<Node>>,
}

impl Default for Nodes {
    fn default() -> Self {
        Self::new()
    }
}

impl Nodes {
    pub fn new() -> Nodes {
        Nodes {
            inner: RwLock::new(vec![]),
        }
    }

    pub fn add_node(&self, addr: String) {
        let mut inner = self.inner.write().expect("nodes lock poisoned");
        if !inner.iter().any(|x| x.get_addr().eq(addr.as_str())) {
            inner.push(Node::new(addr));
        }
    }

    pub fn evict_node(&self, addr: &str) {
        let mut inner = self.inner.write().expect("nodes lock poisoned");
        if let Some(idx) = inner.iter().position(|x| x.get_addr().eq(addr)) {
            inner.remove(idx);
        }
    }

    pub fn get_nodes(&self) -> Vec<Node> {
        self.inner
            .read()
            .expect("nodes lock poisoned")
            .to_vec()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("nodes lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().expect("nodes lock poisoned").is_empty()
    }

    pub fn node_is_known(&self, addr: &str) -> bool {
        let inner = self.inner.read().expect("nodes lock poisoned");
        inner.iter().any(|x| x.get_addr().eq(addr))
    }
}
