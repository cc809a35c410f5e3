//! Compute protocol parser.

use crate::error::SessionError;

/// Operands per request.
pub const OPERANDS: usize = 2;

/// Parse one operand line as a signed decimal integer.
///
/// Surrounding whitespace is ignored; anything else is a malformed request.
pub fn parse_operand(line: &str) -> Result<i64, SessionError> {
    let trimmed = line.trim();
    trimmed
        .parse()
        .map_err(|_| SessionError::MalformedRequest(format!("not an integer: {trimmed:?}")))
}

/// Square an operand without overflow.
pub fn square(n: i64) -> i128 {
    let n = i128::from(n);
    n * n
}

/// Format the response line for one operand.
pub fn response_line(n: i64) -> String {
    format!("Square of {n}: {}", square(n))
}
