//! Per-body token resolution.
//!
//! Emitted bytecode refers to types, methods, fields and string literals through 4-byte
//! tokens. A [`TokenTable`] records what each token of one body stands for. Type and
//! method tokens are the identity tokens of their descriptors; field and string tokens
//! are allocated by the table.

use std::{collections::HashMap, fmt};

use crate::{
    metadata::{method::MethodRc, token::Token, typesystem::CilTypeRc},
    Error, Result,
};

/// What a token stands for.
#[derive(Clone)]
pub enum TokenRef {
    /// A type
    Type(CilTypeRc),
    /// A method
    Method(MethodRc),
    /// An instance field, by layout index in its declaring type
    Field {
        /// Declaring type
        owner: CilTypeRc,
        /// Layout index
        index: usize,
    },
    /// A string literal
    String(String),
}

impl fmt::Debug for TokenRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenRef::Type(ty) => write!(f, "Type({ty})"),
            TokenRef::Method(method) => write!(f, "Method({})", method.full_name()),
            TokenRef::Field { owner, index } => write!(f, "Field({owner}#{index})"),
            TokenRef::String(value) => write!(f, "String({value:?})"),
        }
    }
}

/// Token table of one method body.
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    entries: Vec<(Token, TokenRef)>,
    index: HashMap<Token, usize>,
    next_field_row: u32,
    next_string_row: u32,
}

impl TokenTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Token for a type reference.
    pub fn type_token(&mut self, ty: &CilTypeRc) -> Token {
        let token = ty.token();
        self.insert(token, || TokenRef::Type(ty.clone()));
        token
    }

    /// Token for a method reference.
    pub fn method_token(&mut self, method: &MethodRc) -> Token {
        let token = method.token();
        self.insert(token, || TokenRef::Method(method.clone()));
        token
    }

    /// Token for an instance field reference.
    pub fn field_token(&mut self, owner: &CilTypeRc, index: usize) -> Token {
        let existing = self.entries.iter().find_map(|(token, entry)| match entry {
            TokenRef::Field {
                owner: other,
                index: other_index,
            } if other == owner && *other_index == index => Some(*token),
            _ => None,
        });
        if let Some(token) = existing {
            return token;
        }

        self.next_field_row += 1;
        let token = Token::from_parts(Token::TABLE_FIELD, self.next_field_row);
        self.insert(token, || TokenRef::Field {
            owner: owner.clone(),
            index,
        });
        token
    }

    /// Token for a string literal.
    pub fn string_token(&mut self, value: &str) -> Token {
        let existing = self.entries.iter().find_map(|(token, entry)| match entry {
            TokenRef::String(other) if other == value => Some(*token),
            _ => None,
        });
        if let Some(token) = existing {
            return token;
        }

        self.next_string_row += 1;
        let token = Token::from_parts(Token::TABLE_STRING, self.next_string_row);
        self.insert(token, || TokenRef::String(value.to_string()));
        token
    }

    fn insert(&mut self, token: Token, entry: impl FnOnce() -> TokenRef) {
        if !self.index.contains_key(&token) {
            self.index.insert(token, self.entries.len());
            self.entries.push((token, entry()));
        }
    }

    /// Resolves a token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedToken`] if the token is not in the table.
    pub fn resolve(&self, token: Token) -> Result<&TokenRef> {
        self.index
            .get(&token)
            .and_then(|&position| self.entries.get(position))
            .map(|(_, entry)| entry)
            .ok_or(Error::UnresolvedToken(token))
    }

    /// Resolves a type token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedToken`] if the token is missing or not a type.
    pub fn resolve_type(&self, token: Token) -> Result<&CilTypeRc> {
        match self.resolve(token)? {
            TokenRef::Type(ty) => Ok(ty),
            _ => Err(Error::UnresolvedToken(token)),
        }
    }

    /// Resolves a method token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedToken`] if the token is missing or not a method.
    pub fn resolve_method(&self, token: Token) -> Result<&MethodRc> {
        match self.resolve(token)? {
            TokenRef::Method(method) => Ok(method),
            _ => Err(Error::UnresolvedToken(token)),
        }
    }

    /// Resolves a field token to its declaring type and layout index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedToken`] if the token is missing or not a field.
    pub fn resolve_field(&self, token: Token) -> Result<(&CilTypeRc, usize)> {
        match self.resolve(token)? {
            TokenRef::Field { owner, index } => Ok((owner, *index)),
            _ => Err(Error::UnresolvedToken(token)),
        }
    }

    /// Resolves a string token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedToken`] if the token is missing or not a string.
    pub fn resolve_string(&self, token: Token) -> Result<&str> {
        match self.resolve(token)? {
            TokenRef::String(value) => Ok(value),
            _ => Err(Error::UnresolvedToken(token)),
        }
    }

    pub(crate) fn checkpoint(&self) -> (usize, u32, u32) {
        (self.entries.len(), self.next_field_row, self.next_string_row)
    }

    pub(crate) fn rollback(&mut self, (len, next_field_row, next_string_row): (usize, u32, u32)) {
        for (token, _) in self.entries.drain(len.min(self.entries.len())..) {
            self.index.remove(&token);
        }
        self.next_field_row = next_field_row;
        self.next_string_row = next_string_row;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::registry::TypeRegistry;

    #[test]
    fn tokens_are_deduplicated() {
        let registry = TypeRegistry::new();
        let mut table = TokenTable::new();

        let a = table.type_token(&registry.int32());
        let b = table.type_token(&registry.int32());
        let s1 = table.string_token("hello");
        let s2 = table.string_token("hello");
        let s3 = table.string_token("world");

        assert_eq!(a, b);
        assert_eq!(s1, s2);
        assert_ne!(s1, s3);
        assert_eq!(s1.table(), Token::TABLE_STRING);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn resolution() {
        let registry = TypeRegistry::new();
        let mut table = TokenTable::new();

        let ty = table.type_token(&registry.guid());
        let field = table.field_token(&registry.guid(), 2);
        let string = table.string_token("x");

        assert_eq!(table.resolve_type(ty).unwrap(), &registry.guid());
        let (owner, index) = table.resolve_field(field).unwrap();
        assert_eq!((owner.full_name().as_str(), index), ("System.Guid", 2));
        assert_eq!(table.resolve_string(string).unwrap(), "x");

        assert!(matches!(
            table.resolve_method(ty),
            Err(Error::UnresolvedToken(_))
        ));
        assert!(table.resolve(Token::new(0x7000_0099)).is_err());
    }

    #[test]
    fn rollback_forgets_entries() {
        let registry = TypeRegistry::new();
        let mut table = TokenTable::new();

        table.type_token(&registry.int32());
        let checkpoint = table.checkpoint();
        let string = table.string_token("discarded");
        table.type_token(&registry.string());

        table.rollback(checkpoint);
        assert_eq!(table.len(), 1);
        assert!(table.resolve(string).is_err());
        assert_eq!(table.string_token("again"), string);
    }
}
