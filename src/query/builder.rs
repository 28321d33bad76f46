//! SQL text builder for the CNO microdata query.
//!
//! Every function here is pure: filters in, SQL text out. Nothing is sent
//! anywhere from this module.

use super::filters::{FilterParams, StateFilter, DATE_FORMAT};

pub const MICRODATA_TABLE: &str = "basedosdados.br_rf_cno.microdados";
pub const DICTIONARY_TABLE: &str = "basedosdados.br_rf_cno.dicionario";
pub const STATE_DIRECTORY_TABLE: &str = "basedosdados.br_bd_diretorios_brasil.uf";
pub const MUNICIPALITY_DIRECTORY_TABLE: &str = "basedosdados.br_bd_diretorios_brasil.municipio";

/// Coded microdata columns decoded through the dictionary table
pub const DECODED_COLUMNS: [&str; 2] = ["situacao", "qualificacao_contribuinte"];

/// Plain projection, in output order: (source expression, alias)
const BASE_COLUMNS: [(&str, &str); 16] = [
    ("dados.data_situacao", "data_situacao"),
    ("dados.data_inicio", "data_inicio"),
    ("dados.sigla_uf", "sigla_uf"),
    ("diretorio_sigla_uf.nome", "sigla_uf_nome"),
    ("dados.id_municipio", "id_municipio"),
    ("diretorio_id_municipio.nome", "id_municipio_nome"),
    ("dados.nome_empresarial", "nome_empresarial"),
    ("dados.area", "area"),
    ("dados.unidade_medida", "unidade_medida"),
    ("dados.bairro", "bairro"),
    ("dados.cep", "cep"),
    ("dados.logradouro", "logradouro"),
    ("dados.tipo_logradouro", "tipo_logradouro"),
    ("dados.numero_logradouro", "numero_logradouro"),
    ("dados.complemento", "complemento"),
    ("dados.caixa_postal", "caixa_postal"),
];

/// Quote a string literal, doubling any embedded single quote
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// The WHERE predicates implied by the filters, in a fixed order:
/// date range, state, municipalities.
pub fn filter_clauses(params: &FilterParams) -> Vec<String> {
    let mut clauses = Vec::new();

    match (params.start_date, params.end_date) {
        (Some(start), Some(end)) => clauses.push(format!(
            "dados.data_inicio BETWEEN DATE '{}' AND DATE '{}'",
            start.format(DATE_FORMAT),
            end.format(DATE_FORMAT)
        )),
        (Some(start), None) => clauses.push(format!(
            "dados.data_inicio >= DATE '{}'",
            start.format(DATE_FORMAT)
        )),
        (None, Some(end)) => clauses.push(format!(
            "dados.data_inicio <= DATE '{}'",
            end.format(DATE_FORMAT)
        )),
        (None, None) => {}
    }

    if let Some(code) = params.state.code() {
        clauses.push(format!("dados.sigla_uf = {}", quote_literal(code)));
    }

    if !params.municipalities.is_empty() {
        let names: Vec<String> = params
            .municipalities
            .iter()
            .map(|n| quote_literal(n))
            .collect();
        clauses.push(format!(
            "diretorio_id_municipio.nome IN ({})",
            names.join(", ")
        ));
    }

    clauses
}

fn where_clause(params: &FilterParams) -> String {
    let clauses = filter_clauses(params);
    if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    }
}

fn dictionary_cte(column: &str) -> String {
    format!(
        "dicionario_{column} AS (\n  \
           SELECT chave AS chave_{column}, valor AS descricao_{column}\n  \
           FROM `{DICTIONARY_TABLE}`\n  \
           WHERE id_tabela = 'microdados' AND nome_coluna = {}\n\
         )",
        quote_literal(column)
    )
}

fn projection(decode: bool) -> Vec<String> {
    let mut columns: Vec<String> = BASE_COLUMNS
        .iter()
        .map(|(expr, alias)| format!("{expr} AS {alias}"))
        .collect();

    if decode {
        columns.extend(
            DECODED_COLUMNS
                .iter()
                .map(|c| format!("dicionario_{c}.descricao_{c} AS {c}")),
        );
    }
    columns
}

/// Build the full microdata query for the given filters.
///
/// The returned text always ends with `LIMIT <row_limit>`.
pub fn build_query(params: &FilterParams) -> String {
    let mut sql = String::new();

    if params.decode_dictionary {
        let ctes: Vec<String> = DECODED_COLUMNS.iter().map(|c| dictionary_cte(c)).collect();
        sql.push_str("WITH\n");
        sql.push_str(&ctes.join(",\n"));
        sql.push('\n');
    }

    sql.push_str("SELECT\n  ");
    sql.push_str(&projection(params.decode_dictionary).join(",\n  "));
    sql.push_str(&format!("\nFROM `{MICRODATA_TABLE}` AS dados\n"));
    sql.push_str(&format!(
        "LEFT JOIN (SELECT DISTINCT sigla, nome FROM `{STATE_DIRECTORY_TABLE}`) AS diretorio_sigla_uf\n  \
         ON dados.sigla_uf = diretorio_sigla_uf.sigla\n"
    ));
    sql.push_str(&format!(
        "LEFT JOIN (SELECT DISTINCT id_municipio, nome FROM `{MUNICIPALITY_DIRECTORY_TABLE}`) AS diretorio_id_municipio\n  \
         ON dados.id_municipio = diretorio_id_municipio.id_municipio\n"
    ));

    if params.decode_dictionary {
        for c in DECODED_COLUMNS {
            sql.push_str(&format!(
                "LEFT JOIN dicionario_{c}\n  ON dados.{c} = dicionario_{c}.chave_{c}\n"
            ));
        }
    }

    let filters = where_clause(params);
    if !filters.is_empty() {
        sql.push_str(&filters);
        sql.push('\n');
    }

    sql.push_str(&format!("LIMIT {}", params.row_limit));
    sql
}

/// Lookup query listing municipality names, optionally within one state
pub fn build_municipality_lookup(state: &StateFilter) -> String {
    let filter = match state.code() {
        Some(code) => format!("\nWHERE sigla_uf = {}", quote_literal(code)),
        None => String::new(),
    };
    format!(
        "SELECT DISTINCT nome\nFROM `{MUNICIPALITY_DIRECTORY_TABLE}`{filter}\nORDER BY nome"
    )
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn date(s: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
    }

    #[test]
    fn test_no_filters_yields_no_clauses() {
        let params = FilterParams::unfiltered(10);
        assert!(filter_clauses(&params).is_empty());

        let sql = build_query(&params);
        assert!(!sql.contains("WHERE"));
    }

    #[test]
    fn test_closed_date_range_is_inclusive_between() {
        let params = FilterParams {
            start_date: date("2023-05-16"),
            end_date: date("2025-05-16"),
            ..FilterParams::unfiltered(10)
        };
        assert_eq!(
            filter_clauses(&params),
            vec!["dados.data_inicio BETWEEN DATE '2023-05-16' AND DATE '2025-05-16'"]
        );
    }

    #[test]
    fn test_open_ended_date_bounds() {
        let from = FilterParams {
            start_date: date("2024-01-01"),
            ..FilterParams::unfiltered(10)
        };
        assert_eq!(
            filter_clauses(&from),
            vec!["dados.data_inicio >= DATE '2024-01-01'"]
        );

        let until = FilterParams {
            end_date: date("2024-12-31"),
            ..FilterParams::unfiltered(10)
        };
        assert_eq!(
            filter_clauses(&until),
            vec!["dados.data_inicio <= DATE '2024-12-31'"]
        );
    }

    #[test]
    fn test_state_only_clause() {
        let params = FilterParams {
            state: StateFilter::Code("PR".into()),
            ..FilterParams::unfiltered(10)
        };
        assert_eq!(filter_clauses(&params), vec!["dados.sigla_uf = 'PR'"]);
        assert!(build_query(&params).contains("WHERE dados.sigla_uf = 'PR'\n"));
    }

    #[test]
    fn test_municipality_quotes_are_doubled() {
        let params = FilterParams {
            municipalities: vec!["Pérola d'Oeste".into(), "Curitiba".into()],
            ..FilterParams::unfiltered(10)
        };
        assert_eq!(
            filter_clauses(&params),
            vec!["diretorio_id_municipio.nome IN ('Pérola d''Oeste', 'Curitiba')"]
        );
    }

    #[test]
    fn test_clauses_joined_with_and() {
        let params = FilterParams {
            state: StateFilter::Code("SP".into()),
            start_date: date("2024-01-01"),
            end_date: None,
            municipalities: vec!["Campinas".into()],
            ..FilterParams::unfiltered(10)
        };
        let sql = build_query(&params);
        assert!(sql.contains(
            "WHERE dados.data_inicio >= DATE '2024-01-01' AND dados.sigla_uf = 'SP' \
             AND diretorio_id_municipio.nome IN ('Campinas')"
        ));
    }

    #[test]
    fn test_row_limit_is_suffix() {
        let params = FilterParams {
            row_limit: 12_345,
            ..FilterParams::default()
        };
        assert!(build_query(&params).ends_with("LIMIT 12345"));
    }

    #[test]
    fn test_plain_query_has_no_dictionary_joins() {
        let sql = build_query(&FilterParams::default());
        assert!(sql.starts_with("SELECT"));
        assert!(!sql.contains(DICTIONARY_TABLE));
        assert!(sql.contains("diretorio_sigla_uf.nome AS sigla_uf_nome"));
    }

    #[test]
    fn test_decoded_query_uses_ctes() {
        let params = FilterParams {
            decode_dictionary: true,
            ..FilterParams::default()
        };
        let sql = build_query(&params);
        assert!(sql.starts_with("WITH\ndicionario_situacao AS ("));
        for c in DECODED_COLUMNS {
            assert!(sql.contains(&format!("nome_coluna = '{c}'")));
            assert!(sql.contains(&format!("LEFT JOIN dicionario_{c}\n")));
            assert!(sql.contains(&format!("dicionario_{c}.descricao_{c} AS {c}")));
        }
        assert!(sql.ends_with("LIMIT 100000"));
    }

    #[test]
    fn test_municipality_lookup() {
        let sql = build_municipality_lookup(&StateFilter::Code("PR".into()));
        assert!(sql.contains("WHERE sigla_uf = 'PR'"));
        assert!(sql.ends_with("ORDER BY nome"));

        let all = build_municipality_lookup(&StateFilter::All);
        assert!(!all.contains("WHERE"));
    }
}
