//! 规则词法单元模型

use crate::operators::Operator;
use std::fmt;

/// 上下文中的固定字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextField {
    Profile,
    Role,
    Domain,
    /// 受众自引用伪变量，见 `Audience == 'X'`
    Audience,
    Permission,
    Location,
    AudiencesByName,
    Data,
}

impl ContextField {
    pub const ALL: [ContextField; 8] = [
        Self::Profile,
        Self::Role,
        Self::Domain,
        Self::Audience,
        Self::Permission,
        Self::Location,
        Self::AudiencesByName,
        Self::Data,
    ];

    /// 按规则中的名字查找（大小写敏感）
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Profile => "Profile",
            Self::Role => "Role",
            Self::Domain => "Domain",
            Self::Audience => "Audience",
            Self::Permission => "Permission",
            Self::Location => "Location",
            Self::AudiencesByName => "AudiencesByName",
            Self::Data => "Data",
        }
    }
}

/// 字面量
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Text(String),
    Bool(bool),
}

/// 变量引用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Variable {
    /// 固定字段，如 `Profile`
    Field(ContextField),
    /// 关联记录字段，如 `Account.Owner.Title`
    Record { object: String, field: String },
}

impl Variable {
    /// 规则中书写的名字
    pub fn name(&self) -> String {
        match self {
            Self::Field(field) => field.name().to_string(),
            Self::Record { object, field } => format!("{}.{}", object, field),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Paren {
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Literal(Literal),
    Variable(Variable),
    Operator(Operator),
    Paren(Paren),
}

/// 词法单元，列号从 1 开始，指向其在规则串中的起始字符
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub column: usize,
}

impl Token {
    pub fn new(kind: TokenKind, column: usize) -> Self {
        Self { kind, column }
    }

    /// 字面量和变量视为操作数
    pub fn is_operand(&self) -> bool {
        matches!(self.kind, TokenKind::Literal(_) | TokenKind::Variable(_))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TokenKind::Literal(Literal::Text(s)) => write!(f, "'{}'", s.replace('\'', "\\'")),
            TokenKind::Literal(Literal::Bool(b)) => write!(f, "{}", b),
            TokenKind::Variable(v) => f.write_str(&v.name()),
            TokenKind::Operator(op) => write!(f, "{}", op),
            TokenKind::Paren(Paren::Open) => f.write_str("("),
            TokenKind::Paren(Paren::Close) => f.write_str(")"),
        }
    }
}
