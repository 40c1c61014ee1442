//! REL 函数与运算符表
//!
//! 固定表，不支持用户扩展。比较运算符被改写为运行时支持函数调用而不是原生中缀运算。

use std::fmt;

/// 运行时支持函数的命名空间
pub const SUPPORT_NAMESPACE: &str = "rel";

/// 运行时支持函数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupportFunction {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    IsEmpty,
    Length,
    IsNull,
    IsNotNull,
    Not,
}

impl SupportFunction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Eq => "eq",
            Self::IsEmpty => "isEmpty",
            Self::Length => "length",
            Self::IsNull => "isNull",
            Self::IsNotNull => "isNotNull",
            Self::Not => "not",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let function = match name {
            "gt" => Self::Gt,
            "ge" => Self::Ge,
            "lt" => Self::Lt,
            "le" => Self::Le,
            "eq" => Self::Eq,
            "isEmpty" => Self::IsEmpty,
            "length" => Self::Length,
            "isNull" => Self::IsNull,
            "isNotNull" => Self::IsNotNull,
            "not" => Self::Not,
            _ => return None,
        };
        Some(function)
    }

    pub fn arity(&self) -> usize {
        match self {
            Self::Gt | Self::Ge | Self::Lt | Self::Le | Self::Eq => 2,
            _ => 1,
        }
    }

    /// 带命名空间的调用名，如 `rel::gt`
    pub fn qualified_name(&self) -> String {
        format!("{}::{}", SUPPORT_NAMESPACE, self.name())
    }
}

impl fmt::Display for SupportFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified_name())
    }
}

/// 要求后跟 `(` 的 REL 函数名
pub fn lookup_function(token: &str) -> Option<SupportFunction> {
    match token {
        "isEmpty" => Some(SupportFunction::IsEmpty),
        "length" => Some(SupportFunction::Length),
        "isNull" => Some(SupportFunction::IsNull),
        "isNotNull" => Some(SupportFunction::IsNotNull),
        "!" => Some(SupportFunction::Not),
        _ => None,
    }
}

/// 二元比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOperator {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl ComparisonOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "<>",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let op = match symbol {
            ">" => Self::Gt,
            ">=" => Self::Ge,
            "<" => Self::Lt,
            "<=" => Self::Le,
            "==" => Self::Eq,
            "<>" => Self::Ne,
            _ => return None,
        };
        Some(op)
    }

    /// 改写目标：`<>` 为取反的 `eq`
    pub fn target(&self) -> (bool, SupportFunction) {
        match self {
            Self::Gt => (false, SupportFunction::Gt),
            Self::Ge => (false, SupportFunction::Ge),
            Self::Lt => (false, SupportFunction::Lt),
            Self::Le => (false, SupportFunction::Le),
            Self::Eq => (false, SupportFunction::Eq),
            Self::Ne => (true, SupportFunction::Eq),
        }
    }

    /// 以左操作数打开的调用模板，如 `rel::gt(left, `
    pub fn open_call(&self, left: &str) -> String {
        let (negated, function) = self.target();
        format!(
            "{}{}({}, ",
            if negated { "!" } else { "" },
            function.qualified_name(),
            left
        )
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// 可拼成多字符运算符的单字符
pub fn is_operator_char(token: &str) -> bool {
    matches!(token, ">" | "<" | "=")
}

/// 逻辑连接词
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BooleanConnective {
    And,
    Or,
}

impl BooleanConnective {
    /// 大小写不敏感
    pub fn from_keyword(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("and") {
            Some(Self::And)
        } else if token.eq_ignore_ascii_case("or") {
            Some(Self::Or)
        } else {
            None
        }
    }

    pub fn target(&self) -> &'static str {
        match self {
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

/// 原样透传的 token：布尔字面量、一元 `+`/`-` 与数字
pub fn is_unaltered(token: &str) -> bool {
    matches!(token, "true" | "false" | "+" | "-") || is_numeric_literal(token)
}

/// 可按双精度解析的数字字面量
pub fn is_numeric_literal(token: &str) -> bool {
    token
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || c == '.')
        && token.parse::<f64>().is_ok()
}

/// 一元正负号，本身不构成完整操作数
pub fn is_sign(token: &str) -> bool {
    matches!(token, "+" | "-")
}
