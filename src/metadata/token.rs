//! Metadata tokens for dynamic method bodies.
//!
//! A CIL body never embeds types, methods or strings directly; it embeds 32-bit tokens
//! that the runtime resolves. Bodies built by the emitter resolve their tokens through
//! their own [`crate::emit::TokenTable`], the way `DynamicMethod` bodies resolve through
//! a per-method scope in the CLR. Type and method descriptors additionally carry a token
//! of their own as a stable identity (used as part of the delegate cache key).

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};

/// A metadata token.
///
/// - The high byte (bits 24-31) indicates the table
/// - The low 24 bits (bits 0-23) indicate the row within that table
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Token(pub u32);

impl Token {
    /// Table id for field references
    pub const TABLE_FIELD: u8 = 0x04;
    /// Table id for method references
    pub const TABLE_METHOD: u8 = 0x06;
    /// Table id for type references
    pub const TABLE_TYPE: u8 = 0x02;
    /// Table id for user strings
    pub const TABLE_STRING: u8 = 0x70;

    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token from a table id and a row
    #[must_use]
    pub const fn from_parts(table: u8, row: u32) -> Self {
        Token(((table as u32) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw token value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table type from the token (high byte)
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true if this is a null token (value 0)
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

static NEXT_TYPE_ROW: AtomicU32 = AtomicU32::new(1);
static NEXT_METHOD_ROW: AtomicU32 = AtomicU32::new(1);

/// Allocates a process-unique identity token for a type descriptor.
pub(crate) fn next_type_token() -> Token {
    Token::from_parts(
        Token::TABLE_TYPE,
        NEXT_TYPE_ROW.fetch_add(1, Ordering::Relaxed),
    )
}

/// Allocates a process-unique identity token for a method descriptor.
pub(crate) fn next_method_token() -> Token {
    Token::from_parts(
        Token::TABLE_METHOD,
        NEXT_METHOD_ROW.fetch_add(1, Ordering::Relaxed),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_token_parts() {
        let token = Token::from_parts(Token::TABLE_METHOD, 1);
        assert_eq!(token.value(), 0x06000001);
        assert_eq!(token.table(), 0x06);
        assert_eq!(token.row(), 1);

        let token = Token::from_parts(Token::TABLE_STRING, 0x01FF_FFFF);
        assert_eq!(token.table(), 0x70);
        assert_eq!(token.row(), 0x00FF_FFFF);
    }

    #[test]
    fn test_token_is_null() {
        assert!(Token(0).is_null());
        assert!(!Token(0x06000001).is_null());
    }

    #[test]
    fn test_token_from_conversion() {
        let value = 0x02000007u32;
        let token: Token = value.into();
        assert_eq!(token.value(), value);

        let back_to_u32: u32 = token.into();
        assert_eq!(back_to_u32, value);
    }

    #[test]
    fn test_token_formatting() {
        let token = Token(0x06000001);
        assert_eq!(format!("{}", token), "0x06000001");

        let debug_str = format!("{:?}", token);
        assert!(debug_str.contains("table: 0x06"));
        assert!(debug_str.contains("row: 1"));
    }

    #[test]
    fn test_identity_tokens_are_unique() {
        let a = next_type_token();
        let b = next_type_token();
        let m = next_method_token();

        assert_ne!(a, b);
        assert_eq!(a.table(), Token::TABLE_TYPE);
        assert_eq!(m.table(), Token::TABLE_METHOD);

        let mut map = HashMap::new();
        map.insert(a, "a");
        map.insert(b, "b");
        assert_eq!(map.get(&a), Some(&"a"));
    }
}
