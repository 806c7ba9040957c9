//! 规则操作符定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 规则表达式中的二元操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    // 比较
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
    #[serde(rename = "=~")]
    StartsWith,
    #[serde(rename = "~=")]
    EndsWith,

    // 逻辑
    #[serde(rename = "&&")]
    And,
    #[serde(rename = "||")]
    Or,
}

impl Operator {
    pub const ALL: [Operator; 6] = [
        Self::Eq,
        Self::Neq,
        Self::StartsWith,
        Self::EndsWith,
        Self::And,
        Self::Or,
    ];

    /// 按两字符符号查找操作符
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.symbol() == symbol)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::StartsWith => "=~",
            Self::EndsWith => "~=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }

    /// 优先级：比较 3，AND 2，OR 1，均为左结合
    pub fn precedence(self) -> u8 {
        match self {
            Self::Eq | Self::Neq | Self::StartsWith | Self::EndsWith => 3,
            Self::And => 2,
            Self::Or => 1,
        }
    }

    pub fn is_comparison(self) -> bool {
        self.precedence() == 3
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}
