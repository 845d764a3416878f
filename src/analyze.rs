//! Structural predicates over the pattern tree.

use crate::ast::{Anchor, Node, NodeKind};

/// Whether `node` can only ever match at offset 0.
pub fn is_start_anchored(node: &Node) -> bool {
    match &node.kind {
        NodeKind::Anchor(Anchor::Start) => true,
        NodeKind::Concat(a, b) => is_start_anchored(a) || is_start_anchored(b),
        NodeKind::Group { body, .. } => is_start_anchored(body),
        NodeKind::Alternation(a, b) => is_start_anchored(a) && is_start_anchored(b),
        _ => false,
    }
}

/// Whether `node` can succeed without consuming input.
pub fn can_match_empty(node: &Node) -> bool {
    match &node.kind {
        NodeKind::EmptyMatch | NodeKind::Anchor(_) => true,
        NodeKind::EndMarker => false,
        NodeKind::Wildcard(quant) => quant.min == 0,
        NodeKind::Literal { bytes, quant } => quant.min == 0 || bytes.is_empty(),
        NodeKind::Concat(a, b) => can_match_empty(a) && can_match_empty(b),
        NodeKind::Alternation(a, b) => can_match_empty(a) || can_match_empty(b),
        NodeKind::Group { body, quant, .. } => quant.min == 0 || can_match_empty(body),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::parser::{parse, Syntax};

    fn tree(pattern: &str) -> Node {
        parse(pattern, Syntax::Perl5).unwrap()
    }

    #[rstest]
    #[case("^abc", true)]
    #[case("abc$", false)]
    #[case("^a|^b", true)]
    #[case("^a|b", false)]
    #[case("a^", true)]
    #[case("(^a)b", true)]
    #[case("(?:^a|^b)+", true)]
    #[case(".*a", false)]
    fn start_anchoring(#[case] pattern: &str, #[case] anchored: bool) {
        assert_eq!(is_start_anchored(&tree(pattern)), anchored, "{pattern}");
    }

    #[rstest]
    #[case("a", false)]
    #[case("a*", true)]
    #[case("a?b", false)]
    #[case("(a|)", true)]
    #[case("$", true)]
    #[case("(ab){0,2}", true)]
    #[case("(ab){1,2}", false)]
    #[case(".+", false)]
    fn empty_matches(#[case] pattern: &str, #[case] empty: bool) {
        assert_eq!(can_match_empty(&tree(pattern)), empty, "{pattern}");
    }
}
