use std::any::TypeId;
use std::borrow::Cow;
use std::hash::{Hash, Hasher};
use std::panic::Location;

use crate::metadata::ClassKey;

/// A class-shaped injection token.
///
/// Carries the registration site captured via `#[track_caller]` so that
/// resolution diagnostics can point at the line that minted the token.
/// Equality and hashing consider the type only.
#[derive(Clone, Copy, Debug)]
pub struct ClassToken {
    key: ClassKey,
    registered_at: &'static Location<'static>,
}

impl ClassToken {
    #[track_caller]
    pub fn of<T: 'static>() -> Self {
        Self {
            key: ClassKey::of::<T>(),
            registered_at: Location::caller(),
        }
    }

    pub fn key(&self) -> ClassKey {
        self.key
    }

    pub fn registered_at(&self) -> &'static Location<'static> {
        self.registered_at
    }

    /// Whether this token's type is a primitive wrapper (string, integer,
    /// float, boolean). Such types can never identify a provider uniquely,
    /// and get a dedicated diagnostic when resolution fails.
    pub fn is_primitive(&self) -> bool {
        let id = self.key.type_id();
        id == TypeId::of::<String>()
            || id == TypeId::of::<&'static str>()
            || id == TypeId::of::<bool>()
            || id == TypeId::of::<i8>()
            || id == TypeId::of::<i16>()
            || id == TypeId::of::<i32>()
            || id == TypeId::of::<i64>()
            || id == TypeId::of::<i128>()
            || id == TypeId::of::<isize>()
            || id == TypeId::of::<u8>()
            || id == TypeId::of::<u16>()
            || id == TypeId::of::<u32>()
            || id == TypeId::of::<u64>()
            || id == TypeId::of::<u128>()
            || id == TypeId::of::<usize>()
            || id == TypeId::of::<f32>()
            || id == TypeId::of::<f64>()
    }
}

/// An opaque identifier for an injectable dependency: either a unique
/// class reference or a symbolic string key.
#[derive(Clone, Debug)]
pub enum Token {
    Class(ClassToken),
    Symbolic(Cow<'static, str>),
}

impl Token {
    #[track_caller]
    pub fn of<T: 'static>() -> Self {
        Self::Class(ClassToken::of::<T>())
    }

    /// A class token for an already-captured key. Equality ignores the
    /// call site, so this compares equal to `Token::of::<T>()` for the
    /// same type.
    #[track_caller]
    pub fn from_class_key(key: ClassKey) -> Self {
        Self::Class(ClassToken {
            key,
            registered_at: Location::caller(),
        })
    }

    pub fn symbolic(key: impl Into<Cow<'static, str>>) -> Self {
        Self::Symbolic(key.into())
    }

    pub fn as_class(&self) -> Option<&ClassToken> {
        match self {
            Self::Class(token) => Some(token),
            Self::Symbolic(_) => None,
        }
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Class(a), Self::Class(b)) => a.key() == b.key(),
            (Self::Symbolic(a), Self::Symbolic(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Token {}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Class(token) => {
                state.write_u8(0);
                token.key().hash(state);
            }
            Self::Symbolic(key) => {
                state.write_u8(1);
                key.hash(state);
            }
        }
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Class(token) => f.write_str(token.key().short_name()),
            Self::Symbolic(key) => write!(f, "\"{key}\""),
        }
    }
}

/// Symbolic token under which an entity's repository is registered, so any
/// component can obtain a repository without the core knowing persistence
/// details.
pub fn repository_token_for<Entity: 'static>() -> Token {
    Token::Symbolic(Cow::Owned(format!(
        "repository:{}",
        ClassKey::of::<Entity>().short_name()
    )))
}
