//! Reference executor for compiled programs.
//!
//! All search state lives in a [`SearchCursor`]: registers, the call
//! frames that make backtracking possible, and per-group counters and
//! capture stacks. A search suspended at a match is nothing more than its
//! cursor, so it can be cloned, stored and resumed later.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use log::trace;

use crate::ast::NodeId;
use crate::compiler::WHOLE_MATCH;
use crate::error::RuntimeError;
use crate::program::{Cond, Instr, Label, Operand, Program, Reg};

/// Runtime limits for one search. Both are off unless set.
#[derive(Clone, Copy, Debug, Default)]
pub struct SearchLimits {
    /// Maximum steps per `next_match` call.
    pub(crate) exec_fuel: Option<u32>,
    /// Maximum number of pending calls.
    pub(crate) call_depth: Option<u32>,
}

impl SearchLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exec_fuel(mut self, fuel: u32) -> Self {
        self.exec_fuel = Some(fuel);
        self
    }

    pub fn call_depth(mut self, depth: u32) -> Self {
        self.call_depth = Some(depth);
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Registers {
    pub pos: usize,
    pub rep: usize,
    pub maxrep: usize,
}

impl Registers {
    fn get(&self, reg: Reg) -> usize {
        match reg {
            Reg::Pos => self.pos,
            Reg::Rep => self.rep,
            Reg::MaxRep => self.maxrep,
        }
    }

    fn get_mut(&mut self, reg: Reg) -> &mut usize {
        match reg {
            Reg::Pos => &mut self.pos,
            Reg::Rep => &mut self.rep,
            Reg::MaxRep => &mut self.maxrep,
        }
    }
}

/// A pending call: where to resume and the registers to restore.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame {
    pub return_ip: usize,
    pub saved: Registers,
}

/// Repetition counter and capture stack of one group node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupState {
    pub count: usize,
    /// Alternating start and end offsets, one pair per completed repetition.
    pub captures: Vec<usize>,
    /// State of enclosing activations of the same group.
    outer: Vec<(usize, Vec<usize>)>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SearchState {
    #[default]
    Fresh,
    /// Stopped at a match; resuming backtracks into the next one.
    Suspended,
    /// No further match exists.
    Exhausted,
}

/// Everything needed to continue a search.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchCursor {
    ip: usize,
    regs: Registers,
    frames: Vec<Frame>,
    groups: HashMap<NodeId, GroupState>,
    state: SearchState,
}

impl SearchCursor {
    pub fn state(&self) -> SearchState {
        self.state
    }

    /// Cursor into the subject.
    pub fn position(&self) -> usize {
        self.regs.pos
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn group(&self, group: NodeId) -> Option<&GroupState> {
        self.groups.get(&group)
    }
}

/// A successful match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Match {
    pub span: Range<usize>,
    /// Spans recorded for each capture index, one per repetition.
    pub captures: BTreeMap<u32, Vec<Range<usize>>>,
}

impl Match {
    pub fn start(&self) -> usize {
        self.span.start
    }

    pub fn end(&self) -> usize {
        self.span.end
    }

    /// Every repetition captured by group `index`, in order.
    pub fn group(&self, index: u32) -> &[Range<usize>] {
        self.captures.get(&index).map(Vec::as_slice).unwrap_or_default()
    }
}

/// A resumable search of one program over one subject.
pub struct Search<'p, 's> {
    program: &'p Program,
    subject: &'s [u8],
    cursor: SearchCursor,
    limits: SearchLimits,
}

impl Program {
    /// Start searching `subject`.
    pub fn search<'p, 's>(&'p self, subject: &'s [u8]) -> Search<'p, 's> {
        Search::new(self, subject)
    }
}

impl<'p, 's> Search<'p, 's> {
    pub fn new(program: &'p Program, subject: &'s [u8]) -> Self {
        Self::resume(program, subject, SearchCursor::default())
    }

    /// Continue a search from a cursor taken from an earlier search of the
    /// same program and subject.
    pub fn resume(program: &'p Program, subject: &'s [u8], cursor: SearchCursor) -> Self {
        Self {
            program,
            subject,
            cursor,
            limits: SearchLimits::default(),
        }
    }

    pub fn limits(mut self, limits: SearchLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn cursor(&self) -> &SearchCursor {
        &self.cursor
    }

    pub fn into_cursor(self) -> SearchCursor {
        self.cursor
    }

    /// Find the next match. Once this returns `Ok(None)` it keeps doing so.
    /// An error also ends the search.
    pub fn next_match(&mut self) -> Result<Option<Match>, RuntimeError> {
        match self.cursor.state {
            SearchState::Exhausted => return Ok(None),
            SearchState::Fresh => {
                self.cursor.ip = self.resolve(Label::Search)?;
                self.cursor.regs = Registers::default();
            }
            SearchState::Suspended => {}
        }
        let result = self.run();
        if result.is_err() {
            self.cursor.state = SearchState::Exhausted;
        }
        result
    }

    fn run(&mut self) -> Result<Option<Match>, RuntimeError> {
        let program = self.program;
        let mut steps: u32 = 0;
        loop {
            if let Some(fuel) = self.limits.exec_fuel {
                if steps >= fuel {
                    return Err(RuntimeError::FuelExhausted(fuel));
                }
                steps += 1;
            }

            let ip = self.cursor.ip;
            let instr = program
                .instructions()
                .get(ip)
                .ok_or(RuntimeError::InvalidJump(ip))?;
            self.cursor.ip = ip + 1;

            match instr {
                Instr::Block { .. } => {}
                Instr::Trace(msg) => trace!("{msg} at {}", self.cursor.regs.pos),
                Instr::Set(reg, op) => {
                    let value = self.operand(*op);
                    *self.cursor.regs.get_mut(*reg) = value;
                }
                Instr::Add(reg, op) => {
                    let value = self.operand(*op);
                    let slot = self.cursor.regs.get_mut(*reg);
                    *slot = slot
                        .checked_add(value)
                        .ok_or(RuntimeError::RegisterOverflow(reg_name(*reg)))?;
                }
                Instr::Sub(reg, op) => {
                    let value = self.operand(*op);
                    let slot = self.cursor.regs.get_mut(*reg);
                    *slot = slot
                        .checked_sub(value)
                        .ok_or(RuntimeError::RegisterOverflow(reg_name(*reg)))?;
                }
                Instr::Branch { cond, target } => {
                    if self.test(cond)? {
                        self.cursor.ip = self.resolve(*target)?;
                    }
                }
                Instr::Goto(target) => self.cursor.ip = self.resolve(*target)?,
                Instr::Call(target) => {
                    if let Some(depth) = self.limits.call_depth {
                        if self.cursor.frames.len() >= depth as usize {
                            return Err(RuntimeError::CallDepthExceeded(depth));
                        }
                    }
                    self.cursor.frames.push(Frame {
                        return_ip: self.cursor.ip,
                        saved: self.cursor.regs,
                    });
                    self.cursor.ip = self.resolve(*target)?;
                }
                Instr::Ret => {
                    let frame = self
                        .cursor
                        .frames
                        .pop()
                        .ok_or(RuntimeError::ReturnWithoutCall)?;
                    self.cursor.regs = frame.saved;
                    self.cursor.ip = frame.return_ip;
                }
                Instr::Yield => {
                    self.cursor.state = SearchState::Suspended;
                    return Ok(Some(self.report()));
                }
                Instr::Exhausted => {
                    self.cursor.state = SearchState::Exhausted;
                    self.cursor.ip = ip;
                    return Ok(None);
                }
                Instr::GroupEnter { group, .. } => {
                    let state = self.cursor.groups.entry(*group).or_default();
                    let captures = std::mem::take(&mut state.captures);
                    state.outer.push((state.count, captures));
                    state.count = 0;
                }
                Instr::GroupLeave(group) => {
                    let state = self.group_mut(*group)?;
                    let (count, captures) = state
                        .outer
                        .pop()
                        .ok_or(RuntimeError::InactiveGroup(*group))?;
                    state.count = count;
                    state.captures = captures;
                }
                Instr::CountInc(group) => self.group_mut(*group)?.count += 1,
                Instr::CountDec(group) => {
                    let state = self.group_mut(*group)?;
                    state.count = state
                        .count
                        .checked_sub(1)
                        .ok_or(RuntimeError::RegisterOverflow("gr_rep"))?;
                }
                Instr::CapPush(group) => {
                    let pos = self.cursor.regs.pos;
                    self.group_mut(*group)?.captures.push(pos);
                }
                Instr::CapPop(group) => {
                    self.group_mut(*group)?
                        .captures
                        .pop()
                        .ok_or(RuntimeError::InactiveGroup(*group))?;
                }
            }
        }
    }

    fn resolve(&self, label: Label) -> Result<usize, RuntimeError> {
        // Linking guarantees every referenced label exists.
        self.program
            .resolve(label)
            .ok_or(RuntimeError::InvalidJump(usize::MAX))
    }

    fn group_mut(&mut self, group: NodeId) -> Result<&mut GroupState, RuntimeError> {
        self.cursor
            .groups
            .get_mut(&group)
            .ok_or(RuntimeError::InactiveGroup(group))
    }

    fn operand(&self, op: Operand) -> usize {
        let regs = &self.cursor.regs;
        match op {
            Operand::Imm(n) => n,
            Operand::Reg(reg) => regs.get(reg),
            Operand::LastPos => self.subject.len(),
            Operand::Remaining => self.subject.len().saturating_sub(regs.pos),
        }
    }

    fn test(&self, cond: &Cond) -> Result<bool, RuntimeError> {
        let pos = self.cursor.regs.pos;
        Ok(match cond {
            Cond::Reg(reg, cmp, rhs) => cmp.test(self.cursor.regs.get(*reg), self.operand(*rhs)),
            Cond::Count(group, cmp, n) => {
                let state = self
                    .cursor
                    .groups
                    .get(group)
                    .ok_or(RuntimeError::InactiveGroup(*group))?;
                cmp.test(state.count, *n)
            }
            Cond::Literal { bytes, equal } => {
                let found = pos
                    .checked_add(bytes.len())
                    .and_then(|end| self.subject.get(pos..end));
                (found == Some(&bytes[..])) == *equal
            }
            Cond::Newline { offset, equal } => {
                let byte = pos
                    .checked_add_signed(*offset)
                    .and_then(|at| self.subject.get(at));
                (byte == Some(&b'\n')) == *equal
            }
        })
    }

    fn report(&self) -> Match {
        let mut captures: BTreeMap<u32, Vec<Range<usize>>> = BTreeMap::new();
        for slot in self.program.captures() {
            let Some(state) = self.cursor.groups.get(&slot.group) else {
                continue;
            };
            let spans: Vec<_> = state
                .captures
                .chunks_exact(2)
                .map(|pair| pair[0]..pair[1])
                .collect();
            if !spans.is_empty() {
                captures.entry(slot.index).or_default().extend(spans);
            }
        }
        let pos = self.cursor.regs.pos;
        let span = captures
            .get(&WHOLE_MATCH)
            .and_then(|spans| spans.last().cloned())
            .unwrap_or(pos..pos);
        Match { span, captures }
    }
}

impl Iterator for Search<'_, '_> {
    type Item = Result<Match, RuntimeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_match().transpose()
    }
}

fn reg_name(reg: Reg) -> &'static str {
    match reg {
        Reg::Pos => "pos",
        Reg::Rep => "rep",
        Reg::MaxRep => "maxrep",
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use rstest::rstest;

    use super::*;
    use crate::ast::{Anchor, Bound, Node, Quantifier};
    use crate::compiler::{compile, CompileOptions};
    use crate::parser::{parse, Syntax};

    fn program(pattern: &str) -> Program {
        compile(parse(pattern, Syntax::Perl5).unwrap(), &CompileOptions::default()).unwrap()
    }

    fn spans(pattern: &str, subject: &str) -> Vec<Range<usize>> {
        program(pattern)
            .search(subject.as_bytes())
            .map(|m| m.unwrap().span)
            .collect()
    }

    #[test]
    fn exact_literal_advances_by_its_length() {
        assert_eq!(spans("^abc", "abcd"), vec![0..3]);
    }

    #[test]
    fn literal_mismatch_anywhere_fails() {
        assert!(spans("^abc", "abx").is_empty());
        assert!(spans("^abc", "xbc").is_empty());
        assert!(spans("^abc", "ab").is_empty());
    }

    #[test]
    fn greedy_offers_counts_descending() {
        assert_eq!(spans("^a{1,3}", "aaaa"), vec![0..3, 0..2, 0..1]);
        assert_eq!(spans("^.{1,3}", "aaaa"), vec![0..3, 0..2, 0..1]);
    }

    #[test]
    fn lazy_offers_counts_ascending() {
        assert_eq!(spans("^a{1,3}?", "aaaa"), vec![0..1, 0..2, 0..3]);
        assert_eq!(spans("^.{1,3}?", "aaaa"), vec![0..1, 0..2, 0..3]);
    }

    #[test]
    fn feasible_count_is_clipped_by_input() {
        assert_eq!(spans("^a*", "aa"), vec![0..2, 0..1, 0..0]);
        assert_eq!(spans("^.*?", "ab"), vec![0..0, 0..1, 0..2]);
        assert!(spans("^.{3}", "ab").is_empty());
        assert!(spans("^a{3}?", "aa").is_empty());
    }

    #[test]
    fn alternation_tries_first_branch_first() {
        assert_eq!(spans("^(?:ab|a)", "ab"), vec![0..2, 0..1]);
        assert_eq!(spans("^(?:a|ab)", "ab"), vec![0..1, 0..2]);
    }

    #[test]
    fn second_branch_only_when_first_fails() {
        assert_eq!(spans("^(?:x|a)", "ab"), vec![0..1]);
    }

    #[test]
    fn exhaustion_is_idempotent() {
        let program = program("^x");
        let mut search = program.search(b"ax");
        for _ in 0..3 {
            assert_eq!(search.next_match(), Ok(None));
            assert_eq!(search.cursor().state(), SearchState::Exhausted);
        }
    }

    #[test]
    fn line_anchors() {
        assert_eq!(spans("(?:^|\n)b", "a\nb"), vec![1..3]);
        let program = compile(
            parse("^^ b $$", Syntax::Perl6).unwrap(),
            &CompileOptions::default(),
        )
        .unwrap();
        let found: Vec<_> = program
            .search(b"ab\nb\nbc")
            .map(|m| m.unwrap().span)
            .collect();
        assert_eq!(found, vec![3..4]);
    }

    #[test]
    fn end_anchor() {
        assert_eq!(spans("b$", "abb"), vec![2..3]);
        assert!(spans("a$", "ab").is_empty());
    }

    #[test]
    fn cursor_resumes_where_it_stopped() {
        let program = program("a+");
        let mut search = program.search(b"aab");
        assert_eq!(search.next_match().unwrap().unwrap().span, 0..2);
        let cursor = search.cursor().clone();
        assert_eq!(cursor.state(), SearchState::Suspended);
        assert_eq!(cursor.position(), 2);
        assert!(cursor.depth() > 0);

        let expected = search.next_match().unwrap();
        let mut resumed = Search::resume(&program, b"aab", cursor.clone());
        assert_eq!(resumed.next_match().unwrap(), expected);

        // A cursor taken out of a search is the same value.
        let mut search = program.search(b"aab");
        search.next_match().unwrap();
        assert_eq!(search.into_cursor(), cursor);
    }

    fn ends(atom: Node, subject: &str) -> Vec<usize> {
        let tree = Node::concat(10, Node::anchor(11, Anchor::Start), atom);
        compile(tree, &CompileOptions::default())
            .unwrap()
            .search(subject.as_bytes())
            .map(|m| m.unwrap().end())
            .collect()
    }

    #[rstest]
    #[case(Some("a"), 1, Bound::Finite(3), "aaaa", vec![3, 2, 1])]
    #[case(Some("a"), 0, Bound::Unbounded, "aab", vec![2, 1, 0])]
    #[case(Some("ab"), 0, Bound::Unbounded, "ababa", vec![4, 2, 0])]
    #[case(Some("ab"), 1, Bound::Finite(2), "ababab", vec![4, 2])]
    #[case(Some("a"), 3, Bound::Finite(5), "aa", vec![])]
    #[case(Some("a"), 2, Bound::Unbounded, "a", vec![])]
    #[case(None, 0, Bound::Unbounded, "abc", vec![3, 2, 1, 0])]
    #[case(None, 2, Bound::Finite(4), "abc", vec![3, 2])]
    #[case(None, 3, Bound::Unbounded, "ab", vec![])]
    #[case(None, 0, Bound::Finite(0), "ab", vec![0])]
    fn greedy_and_lazy_offer_the_same_counts(
        #[case] literal: Option<&str>,
        #[case] min: u32,
        #[case] max: Bound,
        #[case] subject: &str,
        #[case] greedy_ends: Vec<usize>,
    ) {
        let atom = |quant: Quantifier| match literal {
            Some(text) => Node::literal(1, text.as_bytes().to_vec(), quant),
            None => Node::wildcard(1, quant),
        };
        let quant = Quantifier::new(min, max);

        assert_eq!(ends(atom(quant), subject), greedy_ends);

        let mut lazy_ends = greedy_ends;
        lazy_ends.reverse();
        assert_eq!(ends(atom(quant.lazy()), subject), lazy_ends);
    }

    #[test]
    fn long_subjects_run_without_limits() {
        let subject = vec![b'a'; 40_000];
        assert_eq!(program("b").search(&subject).next_match(), Ok(None));

        let mut subject = vec![b'a'; 150_000];
        subject.push(b'b');
        let found = program("^(?:a)*b").search(&subject).next_match().unwrap();
        assert_eq!(found.map(|m| m.span), Some(0..150_001));
    }

    #[test]
    fn fuel_limit_stops_runaway_searches() {
        let program = program("a*a*a*b");
        let mut search = program
            .search(&[b'a'; 64])
            .limits(SearchLimits::new().exec_fuel(500));
        assert_eq!(search.next_match(), Err(RuntimeError::FuelExhausted(500)));
        assert_eq!(search.next_match(), Ok(None));
    }

    #[test]
    fn call_depth_limit() {
        // Every repetition of a group nests one more pending call.
        let program = program("(?:a)*b");
        let mut search = program
            .search(&[b'a'; 64])
            .limits(SearchLimits::new().call_depth(8));
        assert_eq!(search.next_match(), Err(RuntimeError::CallDepthExceeded(8)));
    }

    #[test]
    fn nested_groups_restart_their_count() {
        // The inner group needs exactly two `a`s on every outer repetition.
        let program = program("^(?:(a){2}b)+$");
        let found = program.search(b"aabaab").next().unwrap().unwrap();
        assert_eq!(found.span, 0..6);
        assert_eq!(found.group(1), &[3..4, 4..5]);
        assert!(program.search(b"aabab").next().is_none());
    }

    #[test]
    fn bounded_zero_width_group_terminates() {
        let body = Node::new(1, crate::ast::NodeKind::EmptyMatch);
        let tree = Node::group(2, body, Some(1), Quantifier::new(0, Bound::Finite(3)));
        let program = compile(tree, &CompileOptions::default()).unwrap();
        let first = program.search(b"x").next().unwrap().unwrap();
        assert_eq!(first.span, 0..0);
        assert_eq!(first.group(1), &[0..0, 0..0, 0..0]);
    }
}
