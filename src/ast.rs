use std::fmt;

use bytes::Bytes;

/// Identity of a node in the pattern tree. Every label the compiler
/// generates for a node is derived from it, so ids must be unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Upper repetition bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Finite(u32),
    Unbounded,
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Finite(n) => write!(f, "{n}"),
            Bound::Unbounded => f.write_str("Inf"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantifier {
    pub min: u32,
    pub max: Bound,
    pub greedy: bool,
}

impl Quantifier {
    pub const ONCE: Quantifier = Quantifier {
        min: 1,
        max: Bound::Finite(1),
        greedy: true,
    };

    pub fn new(min: u32, max: Bound) -> Self {
        Self {
            min,
            max,
            greedy: true,
        }
    }

    pub fn lazy(self) -> Self {
        Self {
            greedy: false,
            ..self
        }
    }

    pub fn is_once(&self) -> bool {
        self.min == 1 && self.max == Bound::Finite(1)
    }

    /// `min <= max` unless `max` is unbounded.
    pub fn is_valid(&self) -> bool {
        match self.max {
            Bound::Finite(max) => self.min <= max,
            Bound::Unbounded => true,
        }
    }
}

impl fmt::Display for Quantifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{}..{}}}{}",
            self.min,
            self.max,
            if self.greedy { "" } else { "?" }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// `^`: offset 0 only.
    Start,
    /// `$`: the end of the subject only.
    End,
    /// `^^`: offset 0 or right after a newline.
    LineStart,
    /// `$$`: the end of the subject or right before a newline.
    LineEnd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    EmptyMatch,
    EndMarker,
    Wildcard(Quantifier),
    Literal {
        bytes: Bytes,
        quant: Quantifier,
    },
    Concat(Box<Node>, Box<Node>),
    Alternation(Box<Node>, Box<Node>),
    Group {
        body: Box<Node>,
        /// Capture index, `None` for non-capturing groups.
        capture: Option<u32>,
        quant: Quantifier,
    },
    Anchor(Anchor),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
}

impl Node {
    pub fn new(id: u32, kind: NodeKind) -> Self {
        Self {
            id: NodeId(id),
            kind,
        }
    }

    pub fn literal(id: u32, bytes: impl Into<Bytes>, quant: Quantifier) -> Self {
        Self::new(
            id,
            NodeKind::Literal {
                bytes: bytes.into(),
                quant,
            },
        )
    }

    pub fn wildcard(id: u32, quant: Quantifier) -> Self {
        Self::new(id, NodeKind::Wildcard(quant))
    }

    pub fn concat(id: u32, first: Node, second: Node) -> Self {
        Self::new(id, NodeKind::Concat(Box::new(first), Box::new(second)))
    }

    pub fn alternation(id: u32, first: Node, second: Node) -> Self {
        Self::new(id, NodeKind::Alternation(Box::new(first), Box::new(second)))
    }

    pub fn group(id: u32, body: Node, capture: Option<u32>, quant: Quantifier) -> Self {
        Self::new(
            id,
            NodeKind::Group {
                body: Box::new(body),
                capture,
                quant,
            },
        )
    }

    pub fn anchor(id: u32, anchor: Anchor) -> Self {
        Self::new(id, NodeKind::Anchor(anchor))
    }

    /// Direct children, in matching order.
    pub fn children(&self) -> Vec<&Node> {
        match &self.kind {
            NodeKind::Concat(a, b) | NodeKind::Alternation(a, b) => vec![&**a, &**b],
            NodeKind::Group { body, .. } => vec![&**body],
            _ => vec![],
        }
    }

    /// Largest id in this subtree.
    pub fn max_id(&self) -> NodeId {
        self.children()
            .into_iter()
            .map(Node::max_id)
            .fold(self.id, NodeId::max)
    }
}
