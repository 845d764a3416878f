pub mod analyze;
pub mod ast;
pub mod compiler;
pub mod emit;
pub mod error;
pub mod matcher;
pub mod parser;
pub mod program;

pub use compiler::{compile, CompileOptions, MAX_LITERAL_LEN};
pub use error::{CompileError, Error, ParseError, RuntimeError};
pub use matcher::{Match, Search, SearchCursor, SearchLimits, SearchState};
pub use parser::Syntax;
pub use program::Program;

/// Parse `pattern` in the given syntax and compile it.
pub fn compile_with(
    pattern: &str,
    syntax: Syntax,
    options: &CompileOptions,
) -> Result<Program, Error> {
    let tree = parser::parse(pattern, syntax)?;
    Ok(compile(tree, options)?)
}

/// Compile a Perl 5 style pattern.
pub fn compile_perl5(pattern: &str) -> Result<Program, Error> {
    compile_with(pattern, Syntax::Perl5, &CompileOptions::default())
}

/// Compile a Perl 6 rule.
pub fn compile_perl6(pattern: &str) -> Result<Program, Error> {
    compile_with(pattern, Syntax::Perl6, &CompileOptions::default())
}

/// Whether the Perl 5 style `pattern` matches anywhere in `input`.
pub fn is_match(input: &str, pattern: &str) -> anyhow::Result<bool> {
    is_match_with(input, pattern, SearchLimits::default())
}

/// [`is_match`] with runtime limits on the search.
pub fn is_match_with(input: &str, pattern: &str, limits: SearchLimits) -> anyhow::Result<bool> {
    let program = compile_perl5(pattern)?;
    let found = program.search(input.as_bytes()).limits(limits).next_match()?;
    Ok(found.is_some())
}
