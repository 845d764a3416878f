use std::ops::Range;

use pretty_assertions::assert_eq;
use rstest::rstest;
use rulec::analyze::is_start_anchored;
use rulec::parser::parse;
use rulec::{
    compile_perl5, compile_perl6, is_match, is_match_with, CompileError, Error, ParseError, Program,
    RuntimeError, SearchLimits, Syntax,
};

fn first(program: &Program, subject: &str) -> Option<rulec::Match> {
    program.search(subject.as_bytes()).next_match().unwrap()
}

#[rstest]
#[case("a+", "aaab", Some(0..3))]
#[case("a+?", "aaab", Some(0..1))]
#[case("(ab)+", "ababx", Some(0..4))]
#[case("^x", "ax", None)]
#[case("b", "aab", Some(2..3))]
#[case("a.c", "xxabcx", Some(2..5))]
#[case("colou?r", "my color", Some(3..8))]
#[case("x*", "abc", Some(0..0))]
#[case("", "abc", Some(0..0))]
#[case("(?:cat|dog)s$", "dogs cats", Some(5..9))]
#[case("a{2,}b", "aab ab", Some(0..3))]
#[case("a{2,}b", "ab aaab", Some(3..7))]
fn first_match(#[case] pattern: &str, #[case] subject: &str, #[case] span: Option<Range<usize>>) {
    let program = compile_perl5(pattern).unwrap();
    assert_eq!(first(&program, subject).map(|m| m.span), span, "{pattern} on {subject}");
}

#[test]
fn repeated_capture_records_every_repetition() {
    let program = compile_perl5("(ab)+").unwrap();
    let found = first(&program, "ababx").unwrap();
    assert_eq!(found.span, 0..4);
    assert_eq!(found.group(0), &[0..4]);
    assert_eq!(found.group(1), &[0..2, 2..4]);
}

#[rstest]
#[case("ababab", 3)]
#[case("abababab", 4)]
#[case("ababababab", 4)]
#[case("abab", 2)]
fn bounded_capture_pairs_are_contiguous(#[case] subject: &str, #[case] reps: usize) {
    let program = compile_perl5("^(ab){2,4}").unwrap();
    let found = first(&program, subject).unwrap();
    let spans = found.group(1);
    assert_eq!(spans.len(), reps);
    for pair in spans.windows(2) {
        assert_eq!(pair[0].end, pair[1].start);
    }
    assert_eq!(spans.last().map(|s| s.end), Some(found.end()));
}

#[test]
fn bounded_capture_fails_below_minimum() {
    let program = compile_perl5("^(ab){2,4}").unwrap();
    assert!(first(&program, "abx").is_none());
}

#[test]
fn lazy_capture_group_grows_on_demand() {
    let program = compile_perl5("^(a)+?b").unwrap();
    let found = first(&program, "aaab").unwrap();
    assert_eq!(found.span, 0..4);
    assert_eq!(found.group(1), &[0..1, 1..2, 2..3]);
}

#[test]
fn greedy_and_lazy_enumerate_the_same_counts() {
    let greedy = compile_perl5("^(?:ab){1,3}").unwrap();
    let lazy = compile_perl5("^(?:ab){1,3}?").unwrap();
    let ends = |program: &Program| -> Vec<usize> {
        program
            .search(b"abababab")
            .map(|m| m.unwrap().end())
            .collect()
    };
    assert_eq!(ends(&greedy), vec![6, 4, 2]);
    assert_eq!(ends(&lazy), vec![2, 4, 6]);
}

#[test]
fn alternation_prefers_the_first_branch() {
    let program = compile_perl5("^(a|ab)(c|bcd)").unwrap();
    let found = first(&program, "abcd").unwrap();
    assert_eq!(found.span, 0..4);
    assert_eq!(found.group(1), &[0..1]);
    assert_eq!(found.group(2), &[1..4]);
}

#[test]
fn untaken_branch_records_nothing() {
    let program = compile_perl5("(x)|(y)").unwrap();
    let found = first(&program, "y").unwrap();
    assert_eq!(found.group(1), &[] as &[Range<usize>]);
    assert_eq!(found.group(2), &[0..1]);
}

#[test]
fn exhausted_search_stays_exhausted() {
    let program = compile_perl5("b").unwrap();
    let mut search = program.search(b"ab");
    assert_eq!(search.next_match().unwrap().map(|m| m.span), Some(1..2));
    for _ in 0..4 {
        assert_eq!(search.next_match().unwrap(), None);
    }
}

#[test]
fn all_matches_from_one_program() {
    let program = compile_perl5("a").unwrap();
    let spans: Vec<_> = program
        .search(b"banana")
        .map(|m| m.unwrap().span)
        .collect();
    assert_eq!(spans, vec![1..2, 3..4, 5..6]);
}

#[rstest]
#[case("^literal", true)]
#[case("literal$", false)]
#[case("^a|^b", true)]
#[case("^a|b", false)]
fn anchoring(#[case] pattern: &str, #[case] anchored: bool) {
    let tree = parse(pattern, Syntax::Perl5).unwrap();
    assert_eq!(is_start_anchored(&tree), anchored);
}

#[test]
fn perl6_rules() {
    let program = compile_perl6("( a | b )**{2..3} c").unwrap();
    let found = first(&program, "xxabac").unwrap();
    assert_eq!(found.span, 2..6);
    assert_eq!(found.group(1), &[2..3, 3..4, 4..5]);

    let program = compile_perl6("^^ 'foo' $$").unwrap();
    assert_eq!(first(&program, "bar\nfoo\nbaz").map(|m| m.span), Some(4..7));
    assert!(first(&program, "xfoo").is_none());
}

#[test]
fn zero_width_group_under_star_is_rejected() {
    assert!(matches!(
        compile_perl5("(a|)*"),
        Err(Error::Compile(CompileError::EmptyRepetition(_)))
    ));
    assert!(matches!(
        compile_perl6("[ ^^ ]*"),
        Err(Error::Compile(CompileError::EmptyRepetition(_)))
    ));
    assert!(compile_perl5("(a|){0,5}").is_ok());
}

#[test]
fn parse_errors_surface() {
    assert_eq!(
        compile_perl5("(a").unwrap_err(),
        Error::Parse(ParseError::UnexpectedEnd { expected: "`)`" })
    );
}

#[test]
fn listing_describes_every_block() {
    let program = compile_perl5("(ab)+?|c").unwrap();
    let text = program.text();
    for needle in [
        ".sub rule_search",
        "search:",
        "  fail_forever:",
        "    .yield(-1)",
        "# alt R",
        "# group 1 ( R",
        "{1..Inf}?",
        "_repeat:",
        "# end of pattern",
        "  fail:\n    ret\n",
    ] {
        assert!(text.contains(needle), "missing {needle:?} in\n{text}");
    }
}

#[test]
fn is_match_convenience() {
    assert!(is_match("hello world", "o w").unwrap());
    assert!(!is_match("hello", "^world").unwrap());
    assert!(is_match("hello", "(").is_err());
}

#[test]
fn long_linear_subjects_report_no_match() {
    assert!(!is_match(&"a".repeat(40_000), "b").unwrap());

    let subject = format!("{}b", "a".repeat(150_000));
    assert!(is_match(&subject, "^(?:a)*b").unwrap());
    assert!(!is_match(&subject, "^(?:a)*c").unwrap());
}

#[test]
fn explicit_limits_still_apply() {
    let limits = SearchLimits::new().exec_fuel(100);
    let err = is_match_with(&"a".repeat(1_000), "b", limits).unwrap_err();
    assert_eq!(
        err.downcast_ref::<RuntimeError>(),
        Some(&RuntimeError::FuelExhausted(100))
    );
}
