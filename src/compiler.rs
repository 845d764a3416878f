//! Lowering of a pattern tree into a backtracking program.
//!
//! Every node compiles to a block labelled `R<id>` that receives a success
//! continuation. A fragment either jumps to the continuation in tail
//! position or calls it; a call only comes back once everything reachable
//! from the continuation has failed, at which point the fragment tries its
//! next alternative. Exhausted fragments jump to the shared `fail` label,
//! which returns to the most recent call.

use std::collections::HashSet;

use bytes::Bytes;
use log::debug;

use crate::analyze::{can_match_empty, is_start_anchored};
use crate::ast::{Anchor, Bound, Node, NodeId, NodeKind, Quantifier};
use crate::emit::{escape_literal, Assembly, Emitter};
use crate::error::CompileError;
use crate::program::{CaptureSlot, Cmp, Cond, Instr, Label, Operand, Program, Reg};

/// Longest literal run a single node may carry.
pub const MAX_LITERAL_LEN: usize = 256;

/// Capture index of the implicit group around the whole pattern.
pub const WHOLE_MATCH: u32 = 0;

/// Options for one compilation.
#[derive(Clone, Debug)]
pub struct CompileOptions {
    pub(crate) line_markers: bool,
    pub(crate) trace: bool,
    pub(crate) max_literal_len: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            line_markers: true,
            trace: false,
            max_literal_len: MAX_LITERAL_LEN,
        }
    }
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `# line N` markers into the listing.
    pub fn line_markers(mut self, enabled: bool) -> Self {
        self.line_markers = enabled;
        self
    }

    /// Emit a trace instruction at the entry of every node block.
    pub fn trace(mut self, enabled: bool) -> Self {
        self.trace = enabled;
        self
    }

    pub fn max_literal_len(mut self, len: usize) -> Self {
        self.max_literal_len = len;
        self
    }
}

/// Compile a parsed pattern into a program performing a resumable search.
///
/// The tree is wrapped as `(root) <end>` with `root` captured as group 0.
/// Unless the tree is anchored at the start of the subject, a lazy `.*` is
/// put in front so that a failed attempt slides forward one position.
pub fn compile(root: Node, options: &CompileOptions) -> Result<Program, CompileError> {
    validate(&root, options)?;

    let anchored = is_start_anchored(&root);
    debug!("compiling pattern R{}, start anchored: {anchored}", root.id);

    // Wrapper nodes take the ids after the largest one in the tree.
    let max_id = root.max_id();
    let mut next_id = max_id.0;
    let mut fresh = || {
        next_id = next_id
            .checked_add(1)
            .ok_or(CompileError::IdSpaceExhausted(max_id))?;
        Ok::<_, CompileError>(next_id)
    };

    let whole = Node::group(fresh()?, root, Some(WHOLE_MATCH), Quantifier::ONCE);
    let end = Node::new(fresh()?, NodeKind::EndMarker);
    let mut tree = Node::concat(fresh()?, whole, end);
    if !anchored {
        let scan = Node::wildcard(fresh()?, Quantifier::new(0, Bound::Unbounded).lazy());
        tree = Node::concat(fresh()?, scan, tree);
    }

    let program = Compiler::new(options).program(&tree)?;
    debug!(
        "emitted {} instructions, {} capture groups",
        program.instructions().len(),
        program.captures().len()
    );
    Ok(program)
}

/// Reject trees the node compilers cannot lower faithfully.
fn validate(root: &Node, options: &CompileOptions) -> Result<(), CompileError> {
    let mut seen = HashSet::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if !seen.insert(node.id) {
            return Err(CompileError::DuplicateNodeId(node.id));
        }
        let quant = match &node.kind {
            NodeKind::Wildcard(quant) => Some(quant),
            NodeKind::Literal { bytes, quant } => {
                if bytes.is_empty() {
                    return Err(CompileError::EmptyLiteral(node.id));
                }
                if bytes.len() > options.max_literal_len {
                    return Err(CompileError::LiteralTooLong {
                        id: node.id,
                        len: bytes.len(),
                        max: options.max_literal_len,
                    });
                }
                Some(quant)
            }
            NodeKind::Group { body, quant, .. } => {
                if quant.max == Bound::Unbounded && can_match_empty(body) {
                    return Err(CompileError::EmptyRepetition(node.id));
                }
                Some(quant)
            }
            _ => None,
        };
        if let Some(quant) = quant {
            if let Bound::Finite(max) = quant.max {
                if quant.min > max {
                    return Err(CompileError::InvalidBounds {
                        id: node.id,
                        min: quant.min,
                        max,
                    });
                }
            }
        }
        stack.extend(node.children());
    }
    Ok(())
}

fn imm(n: u32) -> Operand {
    Operand::Imm(n as usize)
}

fn reg(r: Reg, cmp: Cmp, rhs: Operand) -> Cond {
    Cond::Reg(r, cmp, rhs)
}

struct Compiler<'o> {
    out: Emitter,
    options: &'o CompileOptions,
    captures: Vec<CaptureSlot>,
}

impl<'o> Compiler<'o> {
    fn new(options: &'o CompileOptions) -> Self {
        Self {
            out: Emitter::new(options.line_markers),
            options,
            captures: Vec::new(),
        }
    }

    /// Emit the search body around the compiled tree and link the result.
    fn program(mut self, root: &Node) -> Result<Program, CompileError> {
        for line in [
            ".sub rule_entry",
            "    .param string target",
            "    new match, rule_search",
            "    match.\"_next\"()",
            "    .return(match)",
            ".end",
            "",
            ".sub rule_search",
            "    .param pmc match",
            "    .param string target",
            "    .param int pos",
            "    .param int lastpos",
            "    .local int rep",
            "    .local int maxrep",
            "    .local pmc gr_rep",
            "    .local pmc gr_cap",
        ] {
            self.out.comment(line);
        }
        self.block(Label::Search, "resumable search".to_string());
        self.emit(Instr::Call(Label::Node(root.id)));
        self.local(Label::FailForever);
        self.emit(Instr::Exhausted);
        self.goto(Label::FailForever);

        self.node(root, Label::Fail);

        self.local(Label::Fail);
        self.emit(Instr::Ret);
        self.out.comment(".end");

        let Assembly { code, text } = self.out.take();
        let mut captures = self.captures;
        captures.sort_by_key(|slot| (slot.index, slot.group));
        Program::link(code, captures, text)
    }

    fn emit(&mut self, instr: Instr) {
        self.out.emit(instr);
    }

    fn block(&mut self, label: Label, comment: String) {
        self.emit(Instr::Block {
            label,
            comment: Some(comment),
        });
        if self.options.trace {
            self.emit(Instr::Trace(label.to_string()));
        }
    }

    fn local(&mut self, label: Label) {
        self.emit(Instr::Block {
            label,
            comment: None,
        });
    }

    fn goto(&mut self, label: Label) {
        self.emit(Instr::Goto(label));
    }

    fn branch(&mut self, cond: Cond, target: Label) {
        self.emit(Instr::Branch { cond, target });
    }

    fn node(&mut self, node: &Node, succ: Label) {
        self.out.mark_lines();
        let id = node.id;
        match &node.kind {
            NodeKind::EmptyMatch => {
                self.block(Label::Node(id), "empty match".to_string());
                self.goto(succ);
            }
            NodeKind::EndMarker => self.end_marker(id),
            NodeKind::Wildcard(quant) => self.wildcard(id, *quant, succ),
            NodeKind::Literal { bytes, quant } => self.literal(id, bytes, *quant, succ),
            NodeKind::Concat(a, b) => self.concat(id, a, b, succ),
            NodeKind::Alternation(a, b) => self.alternation(id, a, b, succ),
            NodeKind::Group {
                body,
                capture,
                quant,
            } => self.group(id, body, *capture, *quant, succ),
            NodeKind::Anchor(anchor) => self.anchor(id, *anchor, succ),
        }
    }

    fn end_marker(&mut self, id: NodeId) {
        self.block(Label::Node(id), "end of pattern".to_string());
        self.emit(Instr::Yield);
        self.goto(Label::Fail);
    }

    fn wildcard(&mut self, id: NodeId, quant: Quantifier, succ: Label) {
        self.block(Label::Node(id), format!("wildcard {quant}"));
        if quant.is_once() {
            self.branch(reg(Reg::Pos, Cmp::Ge, Operand::LastPos), Label::Fail);
            self.emit(Instr::Add(Reg::Pos, imm(1)));
            self.goto(succ);
            return;
        }

        self.emit(Instr::Set(Reg::MaxRep, Operand::Remaining));
        if let Bound::Finite(max) = quant.max {
            let clipped = Label::Local(id, 1);
            self.branch(reg(Reg::MaxRep, Cmp::Le, imm(max)), clipped);
            self.emit(Instr::Set(Reg::MaxRep, imm(max)));
            self.local(clipped);
        }

        let min = imm(quant.min);
        if quant.greedy {
            let retry = Label::Local(id, 2);
            self.emit(Instr::Set(Reg::Rep, Operand::Reg(Reg::MaxRep)));
            self.emit(Instr::Add(Reg::Pos, Operand::Reg(Reg::Rep)));
            self.local(retry);
            self.branch(reg(Reg::Rep, Cmp::Eq, min), succ);
            self.branch(reg(Reg::Rep, Cmp::Lt, min), Label::Fail);
            self.emit(Instr::Call(succ));
            self.emit(Instr::Sub(Reg::Rep, imm(1)));
            self.emit(Instr::Sub(Reg::Pos, imm(1)));
            self.goto(retry);
        } else {
            let retry = Label::Local(id, 3);
            self.emit(Instr::Set(Reg::Rep, min));
            if quant.min > 0 {
                self.emit(Instr::Add(Reg::Pos, min));
            }
            self.local(retry);
            let maxrep = Operand::Reg(Reg::MaxRep);
            self.branch(reg(Reg::Rep, Cmp::Eq, maxrep), succ);
            self.branch(reg(Reg::Rep, Cmp::Gt, maxrep), Label::Fail);
            self.emit(Instr::Call(succ));
            self.emit(Instr::Add(Reg::Rep, imm(1)));
            self.emit(Instr::Add(Reg::Pos, imm(1)));
            self.goto(retry);
        }
    }

    fn literal(&mut self, id: NodeId, bytes: &Bytes, quant: Quantifier, succ: Label) {
        self.block(
            Label::Node(id),
            format!("literal {} {quant}", escape_literal(bytes)),
        );
        let len = Operand::Imm(bytes.len());
        let mismatch = Cond::Literal {
            bytes: bytes.clone(),
            equal: false,
        };

        if quant.is_once() {
            self.branch(mismatch, Label::Fail);
            self.emit(Instr::Add(Reg::Pos, len));
            self.goto(succ);
            return;
        }

        let min = imm(quant.min);
        let expand = Label::Local(id, 1);
        let offer = Label::Local(id, 2);
        self.emit(Instr::Set(Reg::Rep, imm(0)));
        self.local(expand);
        if quant.greedy {
            if let Bound::Finite(max) = quant.max {
                self.branch(reg(Reg::Rep, Cmp::Ge, imm(max)), offer);
            }
            self.branch(mismatch, offer);
            self.emit(Instr::Add(Reg::Rep, imm(1)));
            self.emit(Instr::Add(Reg::Pos, len));
            self.goto(expand);

            self.local(offer);
            self.branch(reg(Reg::Rep, Cmp::Eq, min), succ);
            if quant.min > 0 {
                self.branch(reg(Reg::Rep, Cmp::Lt, min), Label::Fail);
            }
            self.emit(Instr::Call(succ));
            self.emit(Instr::Sub(Reg::Rep, imm(1)));
            self.emit(Instr::Sub(Reg::Pos, len));
            self.goto(offer);
        } else {
            if let Bound::Finite(max) = quant.max {
                self.branch(reg(Reg::Rep, Cmp::Eq, imm(max)), succ);
            }
            if quant.min > 0 {
                self.branch(reg(Reg::Rep, Cmp::Lt, min), offer);
            }
            self.emit(Instr::Call(succ));
            self.local(offer);
            self.branch(mismatch, Label::Fail);
            self.emit(Instr::Add(Reg::Rep, imm(1)));
            self.emit(Instr::Add(Reg::Pos, len));
            self.goto(expand);
        }
    }

    fn concat(&mut self, id: NodeId, a: &Node, b: &Node, succ: Label) {
        self.block(Label::Node(id), format!("concat R{}, R{}", a.id, b.id));
        self.node(a, Label::Node(b.id));
        self.node(b, succ);
    }

    fn alternation(&mut self, id: NodeId, a: &Node, b: &Node, succ: Label) {
        self.block(Label::Node(id), format!("alt R{} | R{}", a.id, b.id));
        self.emit(Instr::Call(Label::Node(a.id)));
        self.goto(Label::Node(b.id));
        self.node(a, succ);
        self.node(b, succ);
    }

    fn group(
        &mut self,
        id: NodeId,
        body: &Node,
        capture: Option<u32>,
        quant: Quantifier,
        succ: Label,
    ) {
        let comment = match capture {
            Some(index) => format!("group {index} ( R{} ) {quant}", body.id),
            None => format!("group [ R{} ] {quant}", body.id),
        };
        self.block(Label::Node(id), comment);

        if quant.is_once() && capture.is_none() {
            self.node(body, succ);
            return;
        }

        let capturing = capture.is_some();
        if let Some(index) = capture {
            self.captures.push(CaptureSlot { index, group: id });
        }

        // Entry: start a fresh count (and capture stack), then hand over to
        // the repeat handler. If that returns, the group has failed.
        self.emit(Instr::GroupEnter {
            group: id,
            capture: capturing,
        });
        self.emit(Instr::Call(Label::Repeat(id)));
        self.emit(Instr::GroupLeave(id));
        self.goto(Label::Fail);

        // Repeat handler: reached on entry and after every repetition of the body.
        let closed = Label::RepeatLocal(id, 1);
        let unwind = Label::RepeatFail(id);
        self.block(Label::Repeat(id), format!("repeat R{id}"));
        if capturing {
            self.branch(Cond::Count(id, Cmp::Lt, 1), closed);
            self.emit(Instr::CapPush(id));
        }
        self.local(closed);

        let min = quant.min as usize;
        if quant.greedy {
            let done = Label::RepeatLocal(id, 2);
            if let Bound::Finite(max) = quant.max {
                self.branch(Cond::Count(id, Cmp::Ge, max as usize), done);
            }
            self.repeat_body(id, body.id, capturing);
            self.local(done);
            if min > 0 {
                self.branch(Cond::Count(id, Cmp::Lt, min), unwind);
            }
            self.emit(Instr::Call(succ));
        } else {
            let more = Label::RepeatLocal(id, 3);
            if min > 0 {
                self.branch(Cond::Count(id, Cmp::Lt, min), more);
            }
            self.emit(Instr::Call(succ));
            self.local(more);
            if let Bound::Finite(max) = quant.max {
                self.branch(Cond::Count(id, Cmp::Ge, max as usize), unwind);
            }
            self.repeat_body(id, body.id, capturing);
        }

        // Undo the end marker pushed on entry to this handler, nothing more.
        self.local(unwind);
        if capturing {
            self.branch(Cond::Count(id, Cmp::Lt, 1), Label::Fail);
            self.emit(Instr::CapPop(id));
        }
        self.goto(Label::Fail);

        self.node(body, Label::Repeat(id));
    }

    /// One more repetition of a group body, undone if it fails.
    fn repeat_body(&mut self, group: NodeId, body: NodeId, capturing: bool) {
        self.emit(Instr::CountInc(group));
        if capturing {
            self.emit(Instr::CapPush(group));
        }
        self.emit(Instr::Call(Label::Node(body)));
        if capturing {
            self.emit(Instr::CapPop(group));
        }
        self.emit(Instr::CountDec(group));
    }

    fn anchor(&mut self, id: NodeId, anchor: Anchor, succ: Label) {
        let label = Label::Node(id);
        match anchor {
            Anchor::Start => {
                self.block(label, "^anchor".to_string());
                self.branch(reg(Reg::Pos, Cmp::Ne, imm(0)), Label::Fail);
                self.goto(succ);
            }
            Anchor::End => {
                self.block(label, "anchor$".to_string());
                self.branch(reg(Reg::Pos, Cmp::Ne, Operand::LastPos), Label::Fail);
                self.goto(succ);
            }
            Anchor::LineStart => {
                self.block(label, "^^anchor".to_string());
                self.branch(reg(Reg::Pos, Cmp::Eq, imm(0)), succ);
                self.branch(
                    Cond::Newline {
                        offset: -1,
                        equal: true,
                    },
                    succ,
                );
                self.goto(Label::Fail);
            }
            Anchor::LineEnd => {
                self.block(label, "anchor$$".to_string());
                self.branch(reg(Reg::Pos, Cmp::Eq, Operand::LastPos), succ);
                self.branch(
                    Cond::Newline {
                        offset: 0,
                        equal: true,
                    },
                    succ,
                );
                self.goto(Label::Fail);
            }
        }
    }
}
