//! REL 表达式翻译器
//!
//! 从左到右扁平改写 token 序列，没有运算符优先级表：复合布尔表达式的含义完全由
//! 作者显式添加的括号决定。同一括号层级混用 `and` 与 `or` 视为语法错误。
//!
//! ```text
//! (age >= 2) and (name == 'x')
//! => (rel::ge(record.get("age"), 2)) && (rel::eq(record.get("name"), "x"))
//! ```

use crate::error::{Result, RuleError};
use crate::operators::{
    BooleanConnective, ComparisonOperator, is_operator_char, is_sign, is_unaltered,
    lookup_function,
};
use crate::schema::SchemaType;
use crate::strategy::VariableStrategy;
use crate::tokenizer::{DEFAULT_QUOTE, Tokenizer};
use rel_shared::observability::metrics;
use std::collections::BTreeSet;

/// 递归翻译的退出条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCondition {
    /// 消费到 token 流结束
    Any,
    /// 在匹配的 `)` 处停止，流结束仍未遇到则为语法错误
    BracketEnd,
    /// 拼出一个完整操作数后立即停止
    EntityEnd,
}

/// 每一步递归的结果，顶层调用方忽略 `token_index`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub code: String,
    pub token_index: usize,
    pub referenced_fields: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct TranslateOptions<'a> {
    pub record_var: Option<&'a str>,
    pub check_fields: bool,
    /// 为 false 时运算符原样输出，不改写为函数调用
    pub translate_operators: bool,
    /// 字符串字面量的引号，需与变量策略一致
    pub quote: char,
}

impl<'a> TranslateOptions<'a> {
    /// 校验规则使用的选项：检查字段并改写运算符
    pub fn for_record(record_var: &'a str) -> Self {
        Self {
            record_var: Some(record_var),
            check_fields: true,
            translate_operators: true,
            quote: DEFAULT_QUOTE,
        }
    }

    /// 模板插值使用的选项：不检查字段
    pub fn for_keyed_store() -> Self {
        Self {
            record_var: None,
            check_fields: false,
            translate_operators: true,
            quote: DEFAULT_QUOTE,
        }
    }

    pub fn with_quote(mut self, quote: char) -> Self {
        self.quote = quote;
        self
    }
}

/// 翻译一段 REL 源码
pub fn translate(
    code: &str,
    schema: Option<&SchemaType>,
    options: TranslateOptions<'_>,
    strategy: &dyn VariableStrategy,
) -> Result<Translation> {
    let result = Tokenizer::new(options.quote)
        .tokenize(code)
        .and_then(|tokens| Translator::new(&tokens, strategy, schema, options).run());

    metrics::record_translation(if result.is_ok() { "ok" } else { "error" });
    result
}

pub struct Translator<'a> {
    tokens: &'a [String],
    strategy: &'a dyn VariableStrategy,
    schema: Option<&'a SchemaType>,
    options: TranslateOptions<'a>,
}

impl<'a> Translator<'a> {
    pub fn new(
        tokens: &'a [String],
        strategy: &'a dyn VariableStrategy,
        schema: Option<&'a SchemaType>,
        options: TranslateOptions<'a>,
    ) -> Self {
        Self {
            tokens,
            strategy,
            schema,
            options,
        }
    }

    pub fn run(&self) -> Result<Translation> {
        self.translate_from(0, ExitCondition::Any)
    }

    fn translate_from(&self, start: usize, exit: ExitCondition) -> Result<Translation> {
        let mut emitted: Vec<String> = Vec::new();
        let mut fields = BTreeSet::new();
        let mut pending: Option<String> = None;
        let mut connective: Option<BooleanConnective> = None;
        let mut i = start;

        while i < self.tokens.len() {
            let token = self.tokens[i].as_str();
            let mut term_closed = false;

            if token == "(" {
                let inner = self.translate_from(i + 1, ExitCondition::BracketEnd)?;
                fields.extend(inner.referenced_fields);
                i = inner.token_index;
                let group = format!("({}", inner.code);
                match pending.take() {
                    Some(open) => emitted.push(format!("{}{})", open, group)),
                    None => emitted.push(group),
                }
                term_closed = true;
            } else if token == ")" {
                if exit != ExitCondition::BracketEnd {
                    return Err(RuleError::Syntax(format!(
                        "第 {} 个 token 处的 ')' 没有匹配的 '('",
                        i + 1
                    )));
                }
                if pending.is_some() {
                    return Err(missing_right_operand(i));
                }
                ensure_not_dangling(&emitted)?;
                match emitted.last_mut() {
                    Some(last) => last.push(')'),
                    None => emitted.push(")".to_string()),
                }
                return Ok(Translation {
                    code: emitted.join(" "),
                    token_index: i + 1,
                    referenced_fields: fields,
                });
            } else if let Some(open) = pending.take() {
                if BooleanConnective::from_keyword(token).is_some()
                    || (self.options.translate_operators && is_operator_char(token))
                {
                    return Err(missing_right_operand(i));
                }
                let inner = self.translate_from(i, ExitCondition::EntityEnd)?;
                fields.extend(inner.referenced_fields);
                i = inner.token_index;
                emitted.push(format!("{}{})", open, inner.code));
                term_closed = true;
            } else if is_unaltered(token) {
                emitted.push(token.to_string());
                i += 1;
                term_closed = !is_sign(token);
            } else if !self.options.translate_operators && is_raw_operator(token) {
                let (symbol, consumed) = self.read_operator(i);
                emitted.push(symbol);
                i += consumed;
            } else if is_operator_char(token) {
                let (symbol, consumed) = self.read_operator(i);
                let operator = ComparisonOperator::from_symbol(&symbol).ok_or_else(|| {
                    RuleError::Syntax(format!("未知运算符 '{}'", symbol))
                })?;
                let left = emitted
                    .pop()
                    .filter(|left| !is_connective_target(left) && !is_sign(left))
                    .ok_or_else(|| {
                        RuleError::Syntax(format!("运算符 '{}' 缺少左操作数", symbol))
                    })?;
                pending = Some(operator.open_call(&left));
                i += consumed;
            } else if let Some(next) = BooleanConnective::from_keyword(token) {
                if connective.is_some_and(|seen| seen != next) {
                    return Err(RuleError::Syntax(
                        "同一层级混用 and 与 or，优先级不明确，请使用括号".to_string(),
                    ));
                }
                if emitted.last().is_none_or(|last| is_connective_target(last)) {
                    return Err(RuleError::Syntax(format!("'{}' 缺少左操作数", token)));
                }
                connective = Some(next);
                emitted.push(next.target().to_string());
                i += 1;
            } else if let Some(function) = lookup_function(token) {
                if self.tokens.get(i + 1).map(String::as_str) != Some("(") {
                    return Err(RuleError::Syntax(format!(
                        "函数 '{}' 后必须紧跟 '('",
                        token
                    )));
                }
                let inner = self.translate_from(i + 2, ExitCondition::BracketEnd)?;
                fields.extend(inner.referenced_fields);
                i = inner.token_index;
                emitted.push(format!("{}({}", function.qualified_name(), inner.code));
                term_closed = true;
            } else {
                let variable = self.strategy.translate(
                    token,
                    self.options.record_var,
                    self.options.check_fields,
                    self.schema,
                )?;
                if let Some(field) = variable.referenced_field {
                    fields.insert(field);
                }
                emitted.push(variable.target_expression);
                i += 1;
                term_closed = true;
            }

            if exit == ExitCondition::EntityEnd && term_closed {
                return Ok(Translation {
                    code: emitted.join(" "),
                    token_index: i,
                    referenced_fields: fields,
                });
            }
        }

        if pending.is_some() {
            return Err(missing_right_operand(i));
        }
        if exit == ExitCondition::BracketEnd {
            return Err(RuleError::Syntax("括号未闭合".to_string()));
        }
        ensure_not_dangling(&emitted)?;

        Ok(Translation {
            code: emitted.join(" "),
            token_index: i,
            referenced_fields: fields,
        })
    }

    /// 把相邻的单字符拼成多字符运算符，返回符号和消费的 token 数
    fn read_operator(&self, i: usize) -> (String, usize) {
        let first = self.tokens[i].as_str();
        if let Some(second) = self.tokens.get(i + 1) {
            let combined = format!("{}{}", first, second);
            if matches!(combined.as_str(), ">=" | "<=" | "==" | "<>") {
                return (combined, 2);
            }
        }
        (first.to_string(), 1)
    }
}

/// 原样模式下直接输出的单字符运算符
fn is_raw_operator(token: &str) -> bool {
    matches!(token, ">" | "<" | "=" | "!" | ",")
}

fn is_connective_target(fragment: &str) -> bool {
    fragment == "&&" || fragment == "||"
}

fn ensure_not_dangling(emitted: &[String]) -> Result<()> {
    match emitted.last() {
        Some(last) if is_connective_target(last) => {
            Err(RuleError::Syntax("逻辑运算符缺少右操作数".to_string()))
        }
        _ => Ok(()),
    }
}

fn missing_right_operand(index: usize) -> RuleError {
    RuleError::Syntax(format!("第 {} 个 token 处的比较运算缺少右操作数", index + 1))
}
