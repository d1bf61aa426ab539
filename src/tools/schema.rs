//! JSON Schema 生成与校验
//!
//! 强类型参数用 schemars 自动生成 schema（子 schema 内联，便于直接放进 function 声明）；
//! 校验用 jsonschema，工具参数与 leaf 的 JSON 输出契约共用。

use jsonschema::Validator;
use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde_json::Value;

/// 为类型 T 生成内联的 JSON Schema（不带 $schema / definitions）
pub fn schema_for_type<T: JsonSchema>() -> Value {
    let generator = SchemaSettings::draft07()
        .with(|s| {
            s.inline_subschemas = true;
            s.meta_schema = None;
        })
        .into_generator();
    let schema = generator.into_root_schema_for::<T>();
    serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}

/// 编译 schema；工具参数与输出契约在构建时各编译一次，之后重复使用
pub fn compile_schema(schema: &Value) -> Result<Validator, String> {
    Validator::new(schema).map_err(|e| format!("invalid schema: {e}"))
}

/// 用已编译的 validator 校验；失败时返回所有违规项的描述（以 "; " 连接）
pub fn validate_with(validator: &Validator, value: &Value) -> Result<(), String> {
    if validator.is_valid(value) {
        return Ok(());
    }
    let errors: Vec<String> = validator.iter_errors(value).map(|e| e.to_string()).collect();
    Err(errors.join("; "))
}

/// 一次性校验（编译 + 校验）
pub fn validate_against_schema(schema: &Value, value: &Value) -> Result<(), String> {
    validate_with(&compile_schema(schema)?, value)
}

/// 从模型的最终文本中取出 JSON：支持 ```json 代码块包裹
pub fn extract_json_block(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    trimmed
}
