//! 校验引擎错误类型

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// 编译诊断信息，行号对应执行器源码清单中的行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: usize,
    pub message: String,
}

impl Diagnostic {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line {}: {}", self.line, self.message)
    }
}

/// 将诊断列表格式化为每行一条的文本
pub fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(Diagnostic::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Error)]
pub enum RuleError {
    /// REL 语法错误：括号未闭合、函数名后缺少 `(`、字段不存在等
    #[error("语法错误: {0}")]
    Syntax(String),

    /// 规则配置错误：缺少错误信息、依赖字段为空、不支持的模式、执行器未初始化等
    #[error("配置错误: {0}")]
    Configuration(String),

    /// 引用了不存在的多语言标签
    #[error("无效引用: {0}")]
    InvalidReference(String),

    #[error("规则名称无效: {0}")]
    InvalidName(String),

    #[error("执行器编译失败:\n{}", format_diagnostics(.0))]
    Compilation(Vec<Diagnostic>),

    #[error("执行器编译超时: {0:?}")]
    CompileTimeout(Duration),

    /// 运行期类型错误：比较了不兼容的操作数
    #[error("类型不匹配: 期望 {expected}, 实际 {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("规则执行失败: {0}")]
    ExecutionError(String),

    #[error("规则未找到: {0}")]
    RuleNotFound(String),

    #[error("对象类型未找到: {0}")]
    TypeNotFound(String),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl RuleError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Syntax(_) => "SYNTAX_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidReference(_) => "INVALID_REFERENCE",
            Self::InvalidName(_) => "INVALID_NAME",
            Self::Compilation(_) => "COMPILATION_ERROR",
            Self::CompileTimeout(_) => "COMPILE_TIMEOUT",
            Self::TypeMismatch { .. } => "TYPE_MISMATCH",
            Self::ExecutionError(_) => "EXECUTION_ERROR",
            Self::RuleNotFound(_) => "RULE_NOT_FOUND",
            Self::TypeNotFound(_) => "TYPE_NOT_FOUND",
            Self::Database(_) => "DATABASE_ERROR",
            Self::JsonError(_) => "JSON_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub(crate) fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compilation_error_lists_one_line_per_diagnostic() {
        let err = RuleError::Compilation(vec![
            Diagnostic::new(4, "未知函数 'rel::foo'"),
            Diagnostic::new(11, "缺少 ')'"),
        ]);

        let text = err.to_string();
        assert!(text.contains("Line 4: 未知函数 'rel::foo'"));
        assert!(text.contains("Line 11: 缺少 ')'"));
        assert_eq!(err.code(), "COMPILATION_ERROR");
    }

    #[test]
    fn test_error_codes_are_distinct_per_taxonomy() {
        assert_eq!(RuleError::Syntax("x".into()).code(), "SYNTAX_ERROR");
        assert_eq!(RuleError::Configuration("x".into()).code(), "CONFIGURATION_ERROR");
        assert_eq!(RuleError::InvalidReference("x".into()).code(), "INVALID_REFERENCE");
        assert_eq!(RuleError::type_mismatch("number", "text").code(), "TYPE_MISMATCH");
    }
}
