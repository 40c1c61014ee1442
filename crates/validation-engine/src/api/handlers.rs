//! 规则管理与记录校验的 HTTP 处理器

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use super::dto::{
    ApiResponse, InitializationDto, ListRulesQuery, RuleDto, SaveRuleRequest, SetActiveRequest,
    TranslateRequest, TranslationDto, ValidateQuery, ValidationResultDto,
};
use super::error::Result;
use super::state::AppState;
use crate::error::RuleError;
use crate::models::Record;
use crate::service::SaveOptions;
use crate::strategy::StrategyKind;
use crate::tokenizer::DEFAULT_QUOTE;
use crate::translator::{TranslateOptions, translate};

/// 保存规则（新建或更新）
///
/// POST /api/rules
pub async fn save_rule(
    State(state): State<AppState>,
    Json(req): Json<SaveRuleRequest>,
) -> Result<Json<ApiResponse<RuleDto>>> {
    req.validate()?;

    let options = SaveOptions {
        regenerate: req.regenerate,
    };
    let rule = state.service.save(req.into_rule(), options).await?;

    info!(rule_id = %rule.id, rule_name = %rule.name, "规则已保存");
    Ok(Json(ApiResponse::success(rule.into())))
}

/// GET /api/rules?type_id=
pub async fn list_rules(
    State(state): State<AppState>,
    Query(query): Query<ListRulesQuery>,
) -> Result<Json<ApiResponse<Vec<RuleDto>>>> {
    let rules = state.service.list_rules(query.type_id).await?;
    Ok(Json(ApiResponse::success(
        rules.into_iter().map(RuleDto::from).collect(),
    )))
}

/// GET /api/rules/{id}
pub async fn get_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<RuleDto>>> {
    let rule = state.service.get_rule(id).await?;
    Ok(Json(ApiResponse::success(rule.into())))
}

/// DELETE /api/rules/{id}
pub async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>> {
    state.service.delete(id).await?;
    Ok(Json(ApiResponse::<()>::success_empty()))
}

/// PUT /api/rules/{id}/active
pub async fn set_rule_active(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SetActiveRequest>,
) -> Result<Json<ApiResponse<RuleDto>>> {
    let rule = state.service.set_active(id, req.active).await?;
    Ok(Json(ApiResponse::success(rule.into())))
}

/// 重建全部类型的执行器
///
/// POST /api/rules/initialize
pub async fn initialize_rules(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<InitializationDto>>> {
    let report = state.service.initialize_all().await?;
    Ok(Json(ApiResponse::success(report.into())))
}

/// 用已安装的执行器校验一条记录
///
/// POST /api/records/{key_prefix}/validate?mode=
pub async fn validate_record(
    State(state): State<AppState>,
    Path(key_prefix): Path<String>,
    Query(query): Query<ValidateQuery>,
    Json(body): Json<Value>,
) -> Result<Json<ApiResponse<ValidationResultDto>>> {
    let record = Record::from_json(body)?;
    let errors = state
        .invoker
        .run_rules(&record, &key_prefix, query.mode.as_deref())?;
    Ok(Json(ApiResponse::success(errors.into())))
}

/// 翻译预览，不保存任何内容
///
/// POST /api/translate
pub async fn translate_expression(
    State(state): State<AppState>,
    Json(req): Json<TranslateRequest>,
) -> Result<Json<ApiResponse<TranslationDto>>> {
    req.validate()?;

    let schema = match req.type_id {
        Some(type_id) => Some(
            state
                .catalog
                .get_type(type_id)
                .ok_or_else(|| RuleError::TypeNotFound(type_id.to_string()))?,
        ),
        None => None,
    };

    let record_var = match req.strategy {
        StrategyKind::Record => Some(req.record_var.as_deref().unwrap_or(&state.record_var)),
        StrategyKind::KeyedStore => None,
    };
    let quote = req.quote.unwrap_or(DEFAULT_QUOTE);
    let options = TranslateOptions {
        record_var,
        check_fields: req.check_fields,
        translate_operators: req.translate_operators,
        quote,
    };
    let strategy = req.strategy.build(quote);

    let translation = translate(&req.code, schema.as_deref(), options, strategy.as_ref())?;
    Ok(Json(ApiResponse::success(TranslationDto {
        code: translation.code,
        referenced_fields: translation.referenced_fields.into_iter().collect(),
    })))
}

/// 健康检查：数据库不可用时返回 503
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let database = match &state.database {
        None => "disabled",
        Some(db) => match db.health_check().await {
            Ok(()) => "ok",
            Err(e) => {
                warn!(error = %e, code = e.code(), "数据库健康检查失败");
                "unavailable"
            }
        },
    };

    let (status, label) = if database == "unavailable" {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    } else {
        (StatusCode::OK, "ok")
    };
    (
        status,
        Json(serde_json::json!({
            "status": label,
            "service": "validation-engine",
            "database": database,
            "executors": state.service.registry().len()
        })),
    )
}
