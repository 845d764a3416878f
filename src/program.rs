//! Target instruction format.
//!
//! A program is a flat list of instructions. Control-flow targets are typed
//! [`Label`]s, resolved to instruction indices once at link time. Each
//! instruction renders to a single line of the textual listing.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;

use crate::ast::NodeId;
use crate::emit::escape_literal;
use crate::error::CompileError;

/// Control-flow target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    /// Start of the resumable search body.
    Search,
    /// Terminal loop reporting permanent exhaustion.
    FailForever,
    /// The shared failure label: returns to the most recent call.
    Fail,
    /// Entry of a node's block.
    Node(NodeId),
    /// Local label inside a node's block.
    Local(NodeId, u8),
    /// Entry of a group's repeat handler.
    Repeat(NodeId),
    RepeatLocal(NodeId, u8),
    /// Failure unwind of a group's repeat handler.
    RepeatFail(NodeId),
}

impl Label {
    /// Block entries start at column zero, local labels are indented.
    fn is_local(&self) -> bool {
        matches!(
            self,
            Label::Local(..)
                | Label::RepeatLocal(..)
                | Label::RepeatFail(_)
                | Label::FailForever
                | Label::Fail
        )
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Search => f.write_str("search"),
            Label::FailForever => f.write_str("fail_forever"),
            Label::Fail => f.write_str("fail"),
            Label::Node(id) => write!(f, "R{id}"),
            Label::Local(id, n) => write!(f, "R{id}_{n}"),
            Label::Repeat(id) => write!(f, "R{id}_repeat"),
            Label::RepeatLocal(id, n) => write!(f, "R{id}_repeat_{n}"),
            Label::RepeatFail(id) => write!(f, "R{id}_repeat_fail"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    /// Cursor into the subject.
    Pos,
    /// Repeat count of the atom being matched.
    Rep,
    /// Largest feasible repeat count of the atom being matched.
    MaxRep,
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Reg::Pos => "pos",
            Reg::Rep => "rep",
            Reg::MaxRep => "maxrep",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Imm(usize),
    Reg(Reg),
    /// Subject length.
    LastPos,
    /// Subject length minus the cursor.
    Remaining,
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Imm(n) => write!(f, "{n}"),
            Operand::Reg(r) => write!(f, "{r}"),
            Operand::LastPos => f.write_str("lastpos"),
            Operand::Remaining => f.write_str("lastpos - pos"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cmp {
    pub fn test(self, lhs: usize, rhs: usize) -> bool {
        match self {
            Cmp::Eq => lhs == rhs,
            Cmp::Ne => lhs != rhs,
            Cmp::Lt => lhs < rhs,
            Cmp::Le => lhs <= rhs,
            Cmp::Gt => lhs > rhs,
            Cmp::Ge => lhs >= rhs,
        }
    }
}

impl fmt::Display for Cmp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Cmp::Eq => "==",
            Cmp::Ne => "!=",
            Cmp::Lt => "<",
            Cmp::Le => "<=",
            Cmp::Gt => ">",
            Cmp::Ge => ">=",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cond {
    Reg(Reg, Cmp, Operand),
    /// Compare a group's repetition counter.
    Count(NodeId, Cmp, usize),
    /// Does the subject at the cursor start with `bytes` (`equal`) or not.
    Literal { bytes: Bytes, equal: bool },
    /// Is the byte at `pos + offset` a newline. Out-of-range offsets are not.
    Newline { offset: isize, equal: bool },
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cond::Reg(r, cmp, rhs) => write!(f, "{r} {cmp} {rhs}"),
            Cond::Count(g, cmp, n) => write!(f, "gr_rep[{g}] {cmp} {n}"),
            Cond::Literal { bytes, equal } => write!(
                f,
                "substr(target, pos, {}) {} {}",
                bytes.len(),
                if *equal { "==" } else { "!=" },
                escape_literal(bytes)
            ),
            Cond::Newline { offset, equal } => {
                let at = match offset {
                    0 => "pos".to_string(),
                    n if *n < 0 => format!("pos - {}", n.unsigned_abs()),
                    n => format!("pos + {n}"),
                };
                write!(
                    f,
                    "target[{at}] {} \"\\n\"",
                    if *equal { "==" } else { "!=" }
                )
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    /// Defines a label. Executes as a no-op.
    Block { label: Label, comment: Option<String> },
    Set(Reg, Operand),
    Add(Reg, Operand),
    Sub(Reg, Operand),
    Branch { cond: Cond, target: Label },
    Goto(Label),
    /// Save all registers and transfer to `Label`. Control comes back only
    /// when everything reachable from there has failed.
    Call(Label),
    /// Restore the registers of the most recent call and resume after it.
    Ret,
    /// Report a match ending at the cursor and suspend.
    Yield,
    /// Report that no further match exists.
    Exhausted,
    /// Save the group's state and start it afresh.
    GroupEnter { group: NodeId, capture: bool },
    /// Restore the state saved by the matching `GroupEnter`.
    GroupLeave(NodeId),
    CountInc(NodeId),
    CountDec(NodeId),
    /// Push the cursor onto the group's capture stack.
    CapPush(NodeId),
    CapPop(NodeId),
    Trace(String),
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Block { label, comment } => {
                let head = if label.is_local() {
                    format!("  {label}:")
                } else {
                    format!("{label}:")
                };
                match comment {
                    Some(c) => write!(f, "{head:<35}# {c}"),
                    None => f.write_str(&head),
                }
            }
            Instr::Set(r, op) => write!(f, "    {r} = {op}"),
            Instr::Add(r, Operand::Imm(1)) => write!(f, "    inc {r}"),
            Instr::Sub(r, Operand::Imm(1)) => write!(f, "    dec {r}"),
            Instr::Add(r, op) => write!(f, "    {r} += {op}"),
            Instr::Sub(r, op) => write!(f, "    {r} -= {op}"),
            Instr::Branch { cond, target } => write!(f, "    if {cond} goto {target}"),
            Instr::Goto(l) => write!(f, "    goto {l}"),
            Instr::Call(l) => write!(f, "    bsr {l}"),
            Instr::Ret => f.write_str("    ret"),
            Instr::Yield => f.write_str("    .yield(pos)"),
            Instr::Exhausted => f.write_str("    .yield(-1)"),
            Instr::GroupEnter { group, capture } => {
                if *capture {
                    write!(f, "    enter gr_rep[{group}], gr_cap[{group}]")
                } else {
                    write!(f, "    enter gr_rep[{group}]")
                }
            }
            Instr::GroupLeave(g) => write!(f, "    leave {g}"),
            Instr::CountInc(g) => write!(f, "    inc gr_rep[{g}]"),
            Instr::CountDec(g) => write!(f, "    dec gr_rep[{g}]"),
            Instr::CapPush(g) => write!(f, "    push gr_cap[{g}], pos"),
            Instr::CapPop(g) => write!(f, "    pop gr_cap[{g}]"),
            Instr::Trace(msg) => write!(f, "    trace {}", escape_literal(msg.as_bytes())),
        }
    }
}

/// A capturing group: its user-visible index and the node holding its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSlot {
    pub index: u32,
    pub group: NodeId,
}

/// A linked, executable program and its textual listing.
#[derive(Debug, Clone)]
pub struct Program {
    code: Vec<Instr>,
    labels: HashMap<Label, usize>,
    captures: Vec<CaptureSlot>,
    text: Bytes,
}

impl Program {
    /// Resolve every label and check that every referenced label exists.
    pub fn link(
        code: Vec<Instr>,
        captures: Vec<CaptureSlot>,
        text: Bytes,
    ) -> Result<Self, CompileError> {
        let mut labels = HashMap::new();
        for (ip, instr) in code.iter().enumerate() {
            if let Instr::Block { label, .. } = instr {
                if labels.insert(*label, ip).is_some() {
                    return Err(CompileError::DuplicateLabel(*label));
                }
            }
        }
        for instr in &code {
            let target = match instr {
                Instr::Branch { target, .. } => target,
                Instr::Goto(l) | Instr::Call(l) => l,
                _ => continue,
            };
            if !labels.contains_key(target) {
                return Err(CompileError::UndefinedLabel(*target));
            }
        }
        Ok(Self {
            code,
            labels,
            captures,
            text,
        })
    }

    pub fn instructions(&self) -> &[Instr] {
        &self.code
    }

    /// Instruction index of `label`.
    pub fn resolve(&self, label: Label) -> Option<usize> {
        self.labels.get(&label).copied()
    }

    pub fn captures(&self) -> &[CaptureSlot] {
        &self.captures
    }

    /// The textual listing, as produced by the output builder.
    pub fn text(&self) -> &str {
        // The emitter only ever writes UTF-8.
        std::str::from_utf8(&self.text).unwrap_or_default()
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_render_like_the_listing() {
        let id = NodeId(7);
        assert_eq!(Label::Node(id).to_string(), "R7");
        assert_eq!(Label::Local(id, 2).to_string(), "R7_2");
        assert_eq!(Label::Repeat(id).to_string(), "R7_repeat");
        assert_eq!(Label::RepeatFail(id).to_string(), "R7_repeat_fail");
    }

    #[test]
    fn instructions_render_one_line_each() {
        let branch = Instr::Branch {
            cond: Cond::Literal {
                bytes: Bytes::from_static(b"a\"b"),
                equal: false,
            },
            target: Label::Fail,
        };
        assert_eq!(
            branch.to_string(),
            "    if substr(target, pos, 3) != \"a\\\"b\" goto fail"
        );
        assert_eq!(Instr::Add(Reg::Rep, Operand::Imm(1)).to_string(), "    inc rep");
        assert_eq!(
            Instr::Sub(Reg::Pos, Operand::Imm(3)).to_string(),
            "    pos -= 3"
        );
        let newline = Cond::Newline {
            offset: -1,
            equal: true,
        };
        assert_eq!(newline.to_string(), "target[pos - 1] == \"\\n\"");
    }

    #[test]
    fn link_rejects_undefined_and_duplicate_labels() {
        let undefined = vec![Instr::Goto(Label::Fail)];
        assert_eq!(
            Program::link(undefined, vec![], Bytes::new()).unwrap_err(),
            CompileError::UndefinedLabel(Label::Fail)
        );

        let block = Instr::Block {
            label: Label::Fail,
            comment: None,
        };
        let duplicate = vec![block.clone(), Instr::Ret, block];
        assert_eq!(
            Program::link(duplicate, vec![], Bytes::new()).unwrap_err(),
            CompileError::DuplicateLabel(Label::Fail)
        );
    }

    #[test]
    fn link_resolves_block_positions() {
        let code = vec![
            Instr::Goto(Label::Fail),
            Instr::Block {
                label: Label::Fail,
                comment: None,
            },
            Instr::Ret,
        ];
        let program = Program::link(code, vec![], Bytes::new()).unwrap();
        assert_eq!(program.resolve(Label::Fail), Some(1));
        assert_eq!(program.resolve(Label::Search), None);
    }
}
