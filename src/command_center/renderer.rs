// src/command_center/renderer.rs
//! Tabular rendering of heterogeneous query results. Pure: the same row set
//! always produces the same columns, order, and formatted cells.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use lazy_static::lazy_static;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::types::Record;

/// Display cap; the underlying result set is never truncated, only the view.
pub const MAX_ROWS_DEFAULT: usize = 10;

/// Character budget for long strings before ellipsis truncation
const TRUNCATE_AT: usize = 80;

/// Placeholder for null/undefined cells
pub const EMPTY_PLACEHOLDER: &str = "—";

/// Internal/bookkeeping columns suppressed regardless of table
const DENIED_COLUMNS: &[&str] = &[
    "id",
    "escritorio_id",
    "user_id",
    "criado_por",
    "created_at",
    "updated_at",
    "criado_em",
    "atualizado_em",
];

/// Columns whose values render as colored badges
const BADGE_COLUMNS: &[&str] = &["status", "prioridade", "area", "fase", "situacao", "tipo"];

/// Columns holding monetary values
const CURRENCY_COLUMNS: &[&str] = &["valor", "honorarios", "total", "saldo", "valor_causa", "valor_parcela"];

lazy_static! {
    /// Static column-label dictionary; unknown columns fall back to a
    /// humanized form of the raw name.
    static ref COLUMN_LABELS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("nome", "Nome");
        m.insert("email", "E-mail");
        m.insert("telefone", "Telefone");
        m.insert("cpf_cnpj", "CPF/CNPJ");
        m.insert("status", "Status");
        m.insert("prioridade", "Prioridade");
        m.insert("area", "Área");
        m.insert("fase", "Fase");
        m.insert("situacao", "Situação");
        m.insert("tipo", "Tipo");
        m.insert("titulo", "Título");
        m.insert("descricao", "Descrição");
        m.insert("observacoes", "Observações");
        m.insert("numero_processo", "Nº do Processo");
        m.insert("comarca", "Comarca");
        m.insert("vara", "Vara");
        m.insert("cliente", "Cliente");
        m.insert("responsavel", "Responsável");
        m.insert("valor", "Valor");
        m.insert("valor_causa", "Valor da Causa");
        m.insert("valor_parcela", "Valor da Parcela");
        m.insert("honorarios", "Honorários");
        m.insert("total", "Total");
        m.insert("saldo", "Saldo");
        m.insert("data_vencimento", "Vencimento");
        m.insert("data_audiencia", "Data da Audiência");
        m.insert("data_abertura", "Data de Abertura");
        m.insert("data_conclusao", "Data de Conclusão");
        m
    };

    /// Fixed badge palette keyed by value; unknown values fall back to gray
    static ref BADGE_PALETTE: HashMap<&'static str, BadgeColor> = {
        let mut m = HashMap::new();
        m.insert("ativo", BadgeColor::Green);
        m.insert("concluido", BadgeColor::Green);
        m.insert("concluída", BadgeColor::Green);
        m.insert("ganho", BadgeColor::Green);
        m.insert("pago", BadgeColor::Green);
        m.insert("pendente", BadgeColor::Amber);
        m.insert("aguardando", BadgeColor::Amber);
        m.insert("media", BadgeColor::Amber);
        m.insert("média", BadgeColor::Amber);
        m.insert("urgente", BadgeColor::Red);
        m.insert("alta", BadgeColor::Red);
        m.insert("atrasado", BadgeColor::Red);
        m.insert("perdido", BadgeColor::Red);
        m.insert("cancelado", BadgeColor::Red);
        m.insert("inadimplente", BadgeColor::Red);
        m.insert("em_andamento", BadgeColor::Blue);
        m.insert("em andamento", BadgeColor::Blue);
        m.insert("novo", BadgeColor::Blue);
        m.insert("baixa", BadgeColor::Blue);
        m.insert("civel", BadgeColor::Blue);
        m.insert("cível", BadgeColor::Blue);
        m.insert("trabalhista", BadgeColor::Purple);
        m.insert("tributario", BadgeColor::Amber);
        m.insert("criminal", BadgeColor::Red);
        m
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BadgeColor {
    Green,
    Red,
    Amber,
    Blue,
    Purple,
    Gray,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cell", rename_all = "lowercase")]
pub enum Cell {
    /// null/undefined/missing key; rendered as a neutral dash
    Empty,
    Text { value: String },
    Badge { value: String, color: BadgeColor },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub key: String,
    pub label: String,
}

/// Human-scannable projection of a tool result. `omitted_rows` counts rows
/// beyond the display cap; they remain in the underlying result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableView {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Cell>>,
    pub omitted_rows: usize,
}

pub fn render(rows: &[Record]) -> TableView {
    render_with_limit(rows, MAX_ROWS_DEFAULT)
}

pub fn render_with_limit(rows: &[Record], max_rows: usize) -> TableView {
    let columns: Vec<Column> = match rows.first() {
        Some(first) => first
            .keys()
            .filter(|key| !DENIED_COLUMNS.contains(&key.as_str()))
            .map(|key| Column {
                key: key.clone(),
                label: column_label(key),
            })
            .collect(),
        None => Vec::new(),
    };

    let visible = rows.len().min(max_rows);
    let rendered = rows[..visible]
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|column| format_cell(&column.key, row.get(&column.key)))
                .collect()
        })
        .collect();

    TableView {
        columns,
        rows: rendered,
        omitted_rows: rows.len() - visible,
    }
}

/// Label from the dictionary, else a humanized form of the raw column name
/// ("data_proxima_audiencia" → "Data Proxima Audiencia").
fn column_label(key: &str) -> String {
    if let Some(label) = COLUMN_LABELS.get(key) {
        return (*label).to_string();
    }
    key.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_cell(key: &str, value: Option<&Value>) -> Cell {
    let value = match value {
        None | Some(Value::Null) => return Cell::Empty,
        Some(v) => v,
    };

    if BADGE_COLUMNS.contains(&key) {
        if let Value::String(s) = value {
            let color = BADGE_PALETTE
                .get(s.to_lowercase().as_str())
                .copied()
                .unwrap_or(BadgeColor::Gray);
            return Cell::Badge {
                value: s.clone(),
                color,
            };
        }
    }

    if CURRENCY_COLUMNS.contains(&key) {
        if let Some(formatted) = format_currency(value) {
            return Cell::Text { value: formatted };
        }
    }

    match value {
        Value::Bool(true) => Cell::Text {
            value: "Sim".to_string(),
        },
        Value::Bool(false) => Cell::Text {
            value: "Não".to_string(),
        },
        Value::Number(n) => Cell::Text {
            value: n.to_string(),
        },
        Value::String(s) => match format_date_like(s) {
            Some(formatted) => Cell::Text { value: formatted },
            None => Cell::Text {
                value: truncate(s),
            },
        },
        Value::Array(items) => {
            let joined = items
                .iter()
                .map(plain_text)
                .collect::<Vec<_>>()
                .join(", ");
            Cell::Text {
                value: truncate(&joined),
            }
        }
        Value::Object(_) => Cell::Text {
            value: truncate(&value.to_string()),
        },
        Value::Null => Cell::Empty,
    }
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= TRUNCATE_AT {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(TRUNCATE_AT).collect();
    truncated.push('…');
    truncated
}

/// Localized date / date-time formatting for ISO-looking string values
fn format_date_like(raw: &str) -> Option<String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.format("%d/%m/%Y %H:%M").to_string());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.format("%d/%m/%Y %H:%M").to_string());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.format("%d/%m/%Y").to_string());
    }
    None
}

/// "R$ 1.234,56" — thousands separated by '.', decimals by ','
fn format_currency(value: &Value) -> Option<String> {
    let amount = match value {
        Value::Number(n) => Decimal::from_f64(n.as_f64()?)?,
        Value::String(s) => s.parse::<Decimal>().ok()?,
        _ => return None,
    };

    let negative = amount.is_sign_negative();
    let cents = (amount.abs() * Decimal::from(100)).round().to_u64()?;
    let whole = cents / 100;
    let fraction = cents % 100;

    let digits = whole.to_string();
    let mut grouped = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    Some(format!(
        "{}R$ {},{:02}",
        if negative { "-" } else { "" },
        grouped,
        fraction
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(value: serde_json::Value) -> Vec<Record> {
        value
            .as_array()
            .expect("array literal")
            .iter()
            .map(|row| row.as_object().expect("object row").clone())
            .collect()
    }

    #[test]
    fn rendering_is_deterministic() {
        let data = rows(json!([
            {"nome": "Acme", "status": "ativo", "valor": 1234.5},
            {"nome": "Beta", "status": "pendente", "valor": 99}
        ]));

        let first = render(&data);
        let second = render(&data);

        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn bookkeeping_columns_are_suppressed() {
        let data = rows(json!([
            {"id": "1", "escritorio_id": 7, "criado_por": 3, "created_at": "2026-01-01T10:00:00Z", "nome": "Acme"}
        ]));

        let view = render(&data);
        let keys: Vec<&str> = view.columns.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["nome"]);
    }

    #[test]
    fn labels_come_from_dictionary_with_humanized_fallback() {
        let data = rows(json!([
            {"numero_processo": "0001", "data_proxima_audiencia": null}
        ]));

        let view = render(&data);
        let labels: Vec<&str> = view.columns.iter().map(|c| c.label.as_str()).collect();
        assert!(labels.contains(&"Nº do Processo"));
        assert!(labels.contains(&"Data Proxima Audiencia"));
    }

    #[test]
    fn currency_dates_booleans_and_nulls_format_semantically() {
        let data = rows(json!([
            {
                "valor": 1234567.5,
                "data_vencimento": "2026-03-15",
                "urgente_flag": true,
                "arquivado_flag": false,
                "observacoes": null
            }
        ]));

        let view = render(&data);
        let row = &view.rows[0];
        let by_key: std::collections::HashMap<&str, &Cell> = view
            .columns
            .iter()
            .zip(row.iter())
            .map(|(c, cell)| (c.key.as_str(), cell))
            .collect();

        assert_eq!(
            by_key["valor"],
            &Cell::Text {
                value: "R$ 1.234.567,50".to_string()
            }
        );
        assert_eq!(
            by_key["data_vencimento"],
            &Cell::Text {
                value: "15/03/2026".to_string()
            }
        );
        assert_eq!(
            by_key["urgente_flag"],
            &Cell::Text {
                value: "Sim".to_string()
            }
        );
        assert_eq!(
            by_key["arquivado_flag"],
            &Cell::Text {
                value: "Não".to_string()
            }
        );
        assert_eq!(by_key["observacoes"], &Cell::Empty);
    }

    #[test]
    fn status_and_priority_render_as_badges_from_fixed_palette() {
        let data = rows(json!([
            {"status": "em_andamento", "prioridade": "alta", "area": "algo_desconhecido"}
        ]));

        let view = render(&data);
        let row = &view.rows[0];
        let by_key: std::collections::HashMap<&str, &Cell> = view
            .columns
            .iter()
            .zip(row.iter())
            .map(|(c, cell)| (c.key.as_str(), cell))
            .collect();

        assert_eq!(
            by_key["status"],
            &Cell::Badge {
                value: "em_andamento".to_string(),
                color: BadgeColor::Blue
            }
        );
        assert_eq!(
            by_key["prioridade"],
            &Cell::Badge {
                value: "alta".to_string(),
                color: BadgeColor::Red
            }
        );
        assert_eq!(
            by_key["area"],
            &Cell::Badge {
                value: "algo_desconhecido".to_string(),
                color: BadgeColor::Gray
            }
        );
    }

    #[test]
    fn arrays_join_and_long_strings_truncate() {
        let long = "a".repeat(200);
        let data = rows(json!([
            {"tags": ["vip", "ativo", 3], "descricao": long}
        ]));

        let view = render(&data);
        let row = &view.rows[0];
        let by_key: std::collections::HashMap<&str, &Cell> = view
            .columns
            .iter()
            .zip(row.iter())
            .map(|(c, cell)| (c.key.as_str(), cell))
            .collect();

        assert_eq!(
            by_key["tags"],
            &Cell::Text {
                value: "vip, ativo, 3".to_string()
            }
        );
        match by_key["descricao"] {
            Cell::Text { value } => {
                assert_eq!(value.chars().count(), TRUNCATE_AT + 1);
                assert!(value.ends_with('…'));
            }
            other => panic!("expected text cell, got {:?}", other),
        }
    }

    #[test]
    fn row_cap_reports_omitted_rows_without_dropping_them_upstream() {
        let data: Vec<Record> = (0..25)
            .map(|i| {
                rows(json!([{"nome": format!("Cliente {}", i)}]))
                    .pop()
                    .unwrap()
            })
            .collect();

        let view = render(&data);
        assert_eq!(view.rows.len(), MAX_ROWS_DEFAULT);
        assert_eq!(view.omitted_rows, 15);
        // the cap is a display concern only; the source rows are untouched
        assert_eq!(data.len(), 25);
    }

    #[test]
    fn missing_keys_render_as_empty_cells() {
        let data = rows(json!([
            {"nome": "Acme", "email": "a@acme.com"},
            {"nome": "Beta"}
        ]));

        let view = render(&data);
        let email_idx = view
            .columns
            .iter()
            .position(|c| c.key == "email")
            .expect("email column");
        assert_eq!(view.rows[1][email_idx], Cell::Empty);
    }

    #[test]
    fn empty_result_set_renders_an_empty_view() {
        let view = render(&[]);
        assert!(view.columns.is_empty());
        assert!(view.rows.is_empty());
        assert_eq!(view.omitted_rows, 0);
    }
}
