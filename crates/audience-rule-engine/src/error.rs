//! 规则引擎错误类型

use thiserror::Error;

/// 规则解析与求值过程中的错误种类
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("字符串字面量未闭合")]
    UnterminatedStringLiteral,

    #[error("无效的转义序列（字面量中只允许 \\'）")]
    InvalidEscapeSequence,

    #[error("意外的单引号")]
    UnexpectedSingleQuote,

    #[error("未知的操作符: {0}")]
    UnknownOperator(String),

    #[error("多余的右括号")]
    UnmatchedClosingParenthesis,

    #[error("括号未闭合")]
    UnclosedParenthesis,

    #[error("此处应为操作符")]
    ExpectedOperator,

    #[error("此处不应出现操作符")]
    UnexpectedOperator,

    #[error("此处应为操作数")]
    ExpectedOperand,

    #[error("未知变量: {0}")]
    UnknownVariable(String),

    #[error("操作符 {0} 缺少操作数")]
    MissingOperand(String),

    #[error("表达式为空")]
    EmptyExpression,

    #[error("表达式结果不是布尔值: {0}")]
    NonBooleanResult(String),

    #[error("不支持的比较: {left} {operator} {right}")]
    UnsupportedComparison {
        operator: String,
        left: String,
        right: String,
    },

    #[error("未注册的受众: {0}")]
    UnknownAudience(String),

    #[error("受众循环引用: {0}")]
    CyclicAudienceReference(String),

    #[error("受众引用嵌套超过上限 {0}")]
    ReferenceDepthExceeded(usize),
}

/// 带列号的解析错误（列号从 1 开始）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} (列 {column})")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub column: usize,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, column: usize) -> Self {
        Self { kind, column }
    }
}

#[derive(Debug, Error)]
pub enum AudienceError {
    #[error("规则解析失败: {0}")]
    Parse(#[from] ParseError),

    #[error("规则未找到: {0}")]
    RuleNotFound(String),

    #[error("受众 {0} 的规则为空")]
    EmptyRule(String),

    #[error("无效的受众条件: {0}")]
    InvalidCriterion(String),

    #[error("JSON 序列化错误: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AudienceError>;
