use std::fmt;

use super::MetadataError;

pub const BOOLEAN: &str = "boolean";
pub const INT: &str = "int";
pub const LONG: &str = "long";
pub const FLOAT: &str = "float";
pub const DOUBLE: &str = "double";
pub const STRING: &str = "String";
pub const LIST: &str = "List";
pub const SET: &str = "Set";
pub const MAP: &str = "Map";
pub const ARRAY: &str = "Array";
pub const CONNECTOR: &str = "Connector";
pub const OBJECT: &str = "Object";
pub const VOID: &str = "void";

/// Types the codec handles without a descriptor in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Boolean,
    Integer,
    Float,
    String,
    List,
    Set,
    Map,
    Connector,
    Object,
    Void,
}

/// A possibly generic type reference, e.g. `Map<String,List<int>>` or
/// `String[]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Type {
    base: String,
    params: Vec<Type>,
}

impl Type {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            params: Vec::new(),
        }
    }

    pub fn generic(base: impl Into<String>, params: Vec<Type>) -> Self {
        Self {
            base: base.into(),
            params,
        }
    }

    pub fn list_of(item: Type) -> Self {
        Self::generic(LIST, vec![item])
    }

    pub fn set_of(item: Type) -> Self {
        Self::generic(SET, vec![item])
    }

    pub fn map_of(value: Type) -> Self {
        Self::generic(MAP, vec![Type::new(STRING), value])
    }

    pub fn array_of(item: Type) -> Self {
        Self::generic(ARRAY, vec![item])
    }

    pub fn base_name(&self) -> &str {
        &self.base
    }

    pub fn params(&self) -> &[Type] {
        &self.params
    }

    pub fn param(&self, index: usize) -> Option<&Type> {
        self.params.get(index)
    }

    pub fn builtin(&self) -> Option<Builtin> {
        let builtin = match self.base.as_str() {
            BOOLEAN => Builtin::Boolean,
            INT | LONG => Builtin::Integer,
            FLOAT | DOUBLE => Builtin::Float,
            STRING => Builtin::String,
            LIST | ARRAY => Builtin::List,
            SET => Builtin::Set,
            MAP => Builtin::Map,
            CONNECTOR => Builtin::Connector,
            OBJECT => Builtin::Object,
            VOID => Builtin::Void,
            _ => return None,
        };
        Some(builtin)
    }

    /// Parses a signature such as `List<String>`, `Map<String,int>` or
    /// `int[]`.
    pub fn parse(signature: &str) -> Result<Type, MetadataError> {
        let mut parser = Parser {
            input: signature,
            pos: 0,
        };
        let ty = parser.parse_type()?;
        parser.skip_ws();
        if parser.pos != signature.len() {
            return Err(MetadataError::InvalidSignature(signature.to_owned()));
        }
        Ok(ty)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.base == ARRAY && self.params.len() == 1 {
            return write!(f, "{}[]", self.params[0]);
        }
        f.write_str(&self.base)?;
        if !self.params.is_empty() {
            f.write_str("<")?;
            for (index, param) in self.params.iter().enumerate() {
                if index > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{param}")?;
            }
            f.write_str(">")?;
        }
        Ok(())
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self) -> MetadataError {
        MetadataError::InvalidSignature(self.input.to_owned())
    }

    fn skip_ws(&mut self) {
        while self.input[self.pos..].starts_with(' ') {
            self.pos += 1;
        }
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.input[self.pos..].starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn parse_type(&mut self) -> Result<Type, MetadataError> {
        self.skip_ws();
        let rest = &self.input[self.pos..];
        let len = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.' || c == '$'))
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(self.error());
        }
        let base = rest[..len].to_owned();
        self.pos += len;

        let mut ty = if self.eat("<") {
            let mut params = vec![self.parse_type()?];
            while self.eat(",") {
                params.push(self.parse_type()?);
            }
            if !self.eat(">") {
                return Err(self.error());
            }
            Type::generic(base, params)
        } else {
            Type::new(base)
        };

        while self.eat("[]") {
            ty = Type::array_of(ty);
        }
        Ok(ty)
    }
}
