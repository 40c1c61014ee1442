//! 执行器编译器
//!
//! 用 `nom` 把 [`ExecutorSource`] 中每条规则的条件解析为表达式树，得到可直接解释执行的
//! [`CompiledExecutor`]。失败时返回带行号的诊断信息，行号对应源码清单。

use crate::codegen::ExecutorSource;
use crate::error::{Diagnostic, Result, RuleError};
use crate::executor::{CompiledExecutor, CompiledRule};
use crate::expr::{AccessRoot, BinaryOp, Expr, RelValue, parse_decimal};
use crate::operators::{SUPPORT_NAMESPACE, SupportFunction};
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::{all_consuming, cut, map, map_opt, opt, recognize, value},
    error::{ErrorKind, VerboseError, VerboseErrorKind, context},
    multi::separated_list0,
    number::complete::recognize_float,
    sequence::{delimited, pair, preceded},
};
use rust_decimal::Decimal;
use std::collections::HashSet;

/// 编译结果
#[derive(Debug)]
pub struct CompileOutcome {
    pub executor: Option<CompiledExecutor>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileOutcome {
    pub fn success(executor: CompiledExecutor) -> Self {
        Self {
            executor: Some(executor),
            diagnostics: Vec::new(),
        }
    }

    pub fn failure(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            executor: None,
            diagnostics,
        }
    }

    pub fn is_success(&self) -> bool {
        self.executor.is_some() && self.diagnostics.is_empty()
    }

    pub fn into_result(self) -> Result<CompiledExecutor> {
        match self.executor {
            Some(executor) if self.diagnostics.is_empty() => Ok(executor),
            _ => Err(RuleError::Compilation(self.diagnostics)),
        }
    }
}

/// 执行器编译服务
///
/// 编译可能耗时，调用方应在阻塞线程池上执行。
pub trait ArtifactCompiler: Send + Sync {
    fn compile(&self, source: &ExecutorSource) -> CompileOutcome;
}

/// 解释型编译器：不生成本地代码，直接保留表达式树
#[derive(Debug, Clone, Copy, Default)]
pub struct InterpretingCompiler;

impl InterpretingCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl ArtifactCompiler for InterpretingCompiler {
    fn compile(&self, source: &ExecutorSource) -> CompileOutcome {
        let (_, condition_lines) = source.render_with_lines();
        let mut diagnostics = Vec::new();
        let mut rules = Vec::with_capacity(source.rules.len());
        let mut methods = HashSet::new();

        for (method, line) in source.rules.iter().zip(condition_lines) {
            if !methods.insert(method.method_name.as_str()) {
                diagnostics.push(Diagnostic::new(
                    line,
                    format!("重复的规则方法 '{}'", method.method_name),
                ));
                continue;
            }
            if method.guard_fields.is_empty() {
                diagnostics.push(Diagnostic::new(
                    line,
                    format!("规则方法 '{}' 缺少守卫字段", method.method_name),
                ));
                continue;
            }

            let condition = match parse_expression(&method.condition) {
                Ok(expr) => expr,
                Err(err) => {
                    diagnostics.push(Diagnostic::new(line, diagnostic_message(err)));
                    continue;
                }
            };

            if let Some(var) = condition
                .record_roots()
                .into_iter()
                .find(|var| *var != source.record_var)
            {
                diagnostics.push(Diagnostic::new(line, format!("未定义的变量 '{}'", var)));
                continue;
            }
            if condition.uses_lookup() {
                diagnostics.push(Diagnostic::new(line, "校验规则不能访问键值存储"));
                continue;
            }

            rules.push(CompiledRule {
                rule_id: method.rule_id,
                name: method.rule_name.clone(),
                guard_fields: method.guard_fields.clone(),
                condition,
                error: method.error.clone(),
            });
        }

        if !diagnostics.is_empty() {
            return CompileOutcome::failure(diagnostics);
        }

        CompileOutcome::success(CompiledExecutor::new(
            source.artifact_name.clone(),
            source.type_id,
            source.type_key.clone(),
            source.record_var.clone(),
            rules,
        ))
    }
}

fn diagnostic_message(err: RuleError) -> String {
    match err {
        RuleError::Syntax(message) => message,
        other => other.to_string(),
    }
}

type PResult<'a, O> = IResult<&'a str, O, VerboseError<&'a str>>;

/// 解析一段目标表达式
///
/// 优先级从低到高：`||`、`&&`、`+ -`、一元 `! -`、`.get(..)` 后缀、原子。
pub fn parse_expression(source: &str) -> Result<Expr> {
    match all_consuming(ws(expression)).parse(source) {
        Ok((_, expr)) => Ok(expr),
        Err(err) => Err(syntax_error(source, err)),
    }
}

/// 取最深处的上下文作为诊断信息，位置按字符计
fn syntax_error(source: &str, err: nom::Err<VerboseError<&str>>) -> RuleError {
    let e = match err {
        nom::Err::Incomplete(_) => return RuleError::Syntax("表达式不完整".to_string()),
        nom::Err::Error(e) | nom::Err::Failure(e) => e,
    };

    let anchor = e
        .errors
        .iter()
        .find(|(_, kind)| matches!(kind, VerboseErrorKind::Context(_)))
        .or_else(|| e.errors.first());
    let Some((rest, kind)) = anchor else {
        return RuleError::Syntax("语法错误".to_string());
    };

    let consumed = source.len().saturating_sub(rest.len());
    let position = source[..consumed].chars().count() + 1;
    let detail = match kind {
        VerboseErrorKind::Context(ctx) => ctx.to_string(),
        VerboseErrorKind::Char(c) => format!("期望 '{}'", c),
        VerboseErrorKind::Nom(ErrorKind::Eof) => "表达式之后存在多余内容".to_string(),
        VerboseErrorKind::Nom(_) => "无法识别的输入".to_string(),
    };
    RuleError::Syntax(format!("第 {} 个字符: {}", position, detail))
}

fn fail<'a, O>(input: &'a str, message: &'static str) -> PResult<'a, O> {
    Err(nom::Err::Failure(VerboseError {
        errors: vec![(input, VerboseErrorKind::Context(message))],
    }))
}

fn expression(input: &str) -> PResult<'_, Expr> {
    parse_or(input)
}

fn parse_or(input: &str) -> PResult<'_, Expr> {
    let (mut input, mut left) = parse_and(input)?;
    loop {
        let (next, op) = opt(ws_tag("||")).parse(input)?;
        if op.is_none() {
            break;
        }
        let (next, right) = parse_and(next)?;
        left = binary(BinaryOp::Or, left, right);
        input = next;
    }
    Ok((input, left))
}

fn parse_and(input: &str) -> PResult<'_, Expr> {
    let (mut input, mut left) = parse_additive(input)?;
    loop {
        let (next, op) = opt(ws_tag("&&")).parse(input)?;
        if op.is_none() {
            break;
        }
        let (next, right) = parse_additive(next)?;
        left = binary(BinaryOp::And, left, right);
        input = next;
    }
    Ok((input, left))
}

/// 左结合的 `+`/`-`
fn parse_additive(input: &str) -> PResult<'_, Expr> {
    let (mut input, mut left) = parse_unary(input)?;
    loop {
        let (next, op) = opt(alt((
            value(BinaryOp::Add, ws_char('+')),
            value(BinaryOp::Sub, ws_char('-')),
        )))
        .parse(input)?;
        let Some(op) = op else {
            break;
        };
        let (next, right) = parse_unary(next)?;
        left = binary(op, left, right);
        input = next;
    }
    Ok((input, left))
}

fn parse_unary(input: &str) -> PResult<'_, Expr> {
    if let Ok((input, _)) = ws_char('!').parse(input) {
        let (input, inner) = parse_unary(input)?;
        return Ok((input, Expr::Not(Box::new(inner))));
    }
    if let Ok((input, _)) = ws_char('-').parse(input) {
        let (input, inner) = parse_unary(input)?;
        return Ok((input, Expr::Negate(Box::new(inner))));
    }
    if let Ok((input, _)) = ws_char('+').parse(input) {
        return parse_unary(input);
    }
    parse_postfix(input)
}

/// 字段访问链 `x.get("a").get("b")`
fn parse_postfix(input: &str) -> PResult<'_, Expr> {
    let (mut input, mut expr) = parse_primary(input)?;
    loop {
        let (next, segment) = opt(preceded(
            ws_char('.'),
            cut(context(
                "只支持 .get(\"字段\") 访问",
                preceded(ws_tag("get"), string_argument),
            )),
        ))
        .parse(input)?;
        let Some(segment) = segment else {
            break;
        };
        match &mut expr {
            Expr::Access { path, .. } => path.push(segment),
            _ => return fail(input, ".get 只能用于字段访问"),
        }
        input = next;
    }

    if let Expr::Access {
        root: AccessRoot::Record(_),
        path,
    } = &expr
    {
        if path.is_empty() {
            return fail(input, "记录变量必须通过 .get 访问字段");
        }
    }
    Ok((input, expr))
}

fn parse_primary(input: &str) -> PResult<'_, Expr> {
    alt((
        delimited(ws_char('('), expression, cut(ws_char(')'))),
        map(ws(number), |n| Expr::Literal(RelValue::Number(n))),
        map(ws(string_literal), |s| Expr::Literal(RelValue::Text(s))),
        parse_word,
    ))
    .parse(input)
}

/// 标识符开头的原子：字面量关键字、`lookup(..)`、`rel::f(..)` 或记录变量
fn parse_word(input: &str) -> PResult<'_, Expr> {
    let (rest, name) = ws(identifier).parse(input)?;
    match name {
        "true" => Ok((rest, Expr::Literal(RelValue::Bool(true)))),
        "false" => Ok((rest, Expr::Literal(RelValue::Bool(false)))),
        "null" => Ok((rest, Expr::Literal(RelValue::Null))),
        "lookup" => {
            let (rest, key) =
                cut(context("lookup 需要一个字符串参数", string_argument)).parse(rest)?;
            Ok((
                rest,
                Expr::Access {
                    root: AccessRoot::Lookup(key),
                    path: Vec::new(),
                },
            ))
        }
        ns if ns == SUPPORT_NAMESPACE => match ws_tag("::").parse(rest) {
            Ok((rest, _)) => parse_call(rest),
            Err(_) => Ok((rest, record_access(name))),
        },
        _ => Ok((rest, record_access(name))),
    }
}

fn parse_call(input: &str) -> PResult<'_, Expr> {
    let (input, function) = cut(context(
        "未知的 rel:: 函数",
        map_opt(ws(identifier), SupportFunction::from_name),
    ))
    .parse(input)?;
    let (input, args) = preceded(
        cut(ws_char('(')),
        separated_list0(ws_char(','), expression),
    )
    .parse(input)?;
    let (input, _) = cut(ws_char(')')).parse(input)?;

    if args.len() != function.arity() {
        return fail(input, "函数参数个数不匹配");
    }
    Ok((input, Expr::Call { function, args }))
}

fn string_argument(input: &str) -> PResult<'_, String> {
    delimited(ws_char('('), ws(string_literal), ws_char(')')).parse(input)
}

/// 双引号字符串，支持 `\\ \" \n \r \t` 转义
fn string_literal(input: &str) -> PResult<'_, String> {
    let escapes = alt((
        value("\\", char('\\')),
        value("\"", char('"')),
        value("\n", char('n')),
        value("\r", char('r')),
        value("\t", char('t')),
    ));
    map(
        delimited(
            char('"'),
            opt(escaped_transform(is_not("\\\""), '\\', escapes)),
            cut(context("字符串字面量未闭合", char('"'))),
        ),
        Option::unwrap_or_default,
    )
    .parse(input)
}

fn number(input: &str) -> PResult<'_, Decimal> {
    let parsed: PResult<'_, &str> = recognize_float(input);
    let (rest, text) = parsed?;
    match parse_decimal(text) {
        Some(n) => Ok((rest, n)),
        None => fail(input, "数字超出范围"),
    }
}

fn identifier(input: &str) -> PResult<'_, &str> {
    recognize(pair(
        take_while1(|c: char| c == '_' || c.is_ascii_alphabetic()),
        take_while(|c: char| c == '_' || c.is_ascii_alphanumeric()),
    ))
    .parse(input)
}

fn ws<'a, O, P>(mut parser: P) -> impl FnMut(&'a str) -> PResult<'a, O>
where
    P: FnMut(&'a str) -> PResult<'a, O>,
{
    move |input| delimited(multispace0, &mut parser, multispace0).parse(input)
}

fn ws_char<'a>(c: char) -> impl FnMut(&'a str) -> PResult<'a, char> {
    ws(char(c))
}

fn ws_tag<'a>(t: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    ws(tag(t))
}

fn record_access(var: &str) -> Expr {
    Expr::Access {
        root: AccessRoot::Record(var.to_string()),
        path: Vec::new(),
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
