//! Query URL rendering and execution

use anyhow::{Context, Result};
use colored::*;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::UrlCommands;
use crate::cli::output::format_output;
use odata_client::api::query::{EntityKey, FilterValue, OrderBy, QueryBuilder};
use odata_client::api::ODataClient;
use odata_client::ClientConfig;

pub async fn handle_url_command(args: UrlCommands, config: &ClientConfig) -> Result<()> {
    let send = args.send;
    let all_pages = args.all_pages;
    let format = args.format;
    let query = build_query(args)?.build().context("Failed to compile query")?;

    if !send {
        println!("{}", query.to_url());
        return Ok(());
    }

    let client = ODataClient::new(config.clone())?;
    let cancel = CancellationToken::new();
    eprintln!("{} {}", "GET".bold(), query.to_url().dimmed());

    let mut result = client
        .execute_query(&query, &cancel)
        .await
        .context("Failed to execute query")?;
    if !result.success {
        anyhow::bail!(
            "Query failed with HTTP {}: {}",
            result.status_code,
            result.error.unwrap_or_default()
        );
    }

    let count = result.count();
    let mut records: Vec<Value> = result.records().cloned().unwrap_or_default();
    while all_pages && result.has_more() {
        match result.next_page(&client, &cancel).await? {
            Some(next) => {
                records.extend(next.records().cloned().unwrap_or_default());
                result = next;
            }
            None => break,
        }
        log::debug!("Fetched {} records so far", records.len());
    }

    println!("{}", format_output(&Value::Array(records), format)?);
    if let Some(count) = count {
        eprintln!("{} {}", "Total count:".bold(), count);
    }
    Ok(())
}

fn build_query(args: UrlCommands) -> Result<QueryBuilder> {
    let mut builder = QueryBuilder::new(args.entity_set);

    if let Some(key) = args.key {
        builder = builder.key(parse_key(&key)?);
    }
    if let Some(cast) = args.cast {
        builder = builder.cast(cast);
    }
    for filter in &args.filter {
        builder = builder.filter_raw(filter);
    }
    if let Some(search) = args.search {
        builder = builder.search(search);
    }
    if !args.select.is_empty() {
        let fields: Vec<&str> = args.select.iter().map(String::as_str).collect();
        builder = builder.select(&fields);
    }
    for expand in &args.expand {
        builder = builder.expand(expand.as_str());
    }
    for order in &args.orderby {
        builder = builder.order_by(OrderBy::parse(order));
    }
    if let Some(skip) = args.skip {
        builder = builder.skip(skip);
    }
    if let Some(top) = args.top {
        builder = builder.top(top);
    }
    if args.count {
        builder = builder.count();
    }
    if let Some(apply) = args.apply {
        builder = builder.apply(apply);
    }
    for compute in args.compute {
        builder = builder.compute(compute);
    }
    Ok(builder)
}

/// Integers and GUIDs stay typed; anything else is a string key
fn parse_key(raw: &str) -> Result<EntityKey> {
    let value = if let Ok(n) = raw.parse::<i64>() {
        FilterValue::Int(n)
    } else if let Ok(guid) = raw.parse::<uuid::Uuid>() {
        FilterValue::Guid(guid)
    } else {
        FilterValue::String(raw.to_string())
    };
    EntityKey::try_from(value).context("Invalid key")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::output::OutputFormat;

    fn args(entity_set: &str) -> UrlCommands {
        UrlCommands {
            entity_set: entity_set.to_string(),
            key: None,
            cast: None,
            filter: Vec::new(),
            search: None,
            select: Vec::new(),
            expand: Vec::new(),
            orderby: Vec::new(),
            skip: None,
            top: None,
            count: false,
            apply: None,
            compute: Vec::new(),
            send: false,
            all_pages: false,
            format: OutputFormat::Json,
        }
    }

    #[test]
    fn test_build_query_from_args() {
        let mut a = args("Products");
        a.select = vec!["Id".into(), "Name".into()];
        a.orderby = vec!["Price desc".into()];
        a.top = Some(5);
        a.count = true;

        let url = build_query(a).unwrap().build_url().unwrap();
        assert_eq!(url, "Products?$select=Id,Name&$orderby=Price desc&$top=5&$count=true");
    }

    #[test]
    fn test_key_parsing() {
        assert_eq!(parse_key("42").unwrap().render(), "42");
        assert_eq!(parse_key("ABC").unwrap().render(), "'ABC'");
        assert_eq!(
            parse_key("b6a2c1f0-0d3e-4a7c-9f7e-2a1c4e5d6f70").unwrap().render(),
            "b6a2c1f0-0d3e-4a7c-9f7e-2a1c4e5d6f70"
        );
    }
}
