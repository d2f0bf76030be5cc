//! Predicate compiler: `Filter` tree -> `$filter` text
//!
//! OData gives `and` a higher precedence than `or`, so an `or` node directly
//! under an `and` is the only place that needs parentheses.

use log::trace;

use super::filters::{BinaryOperator, Filter, MemberPath, PathRoot, QuantifierKind};
use super::literal::{FilterValue, format_literal};
use crate::api::error::{ODataError, Result};

/// Compile a predicate tree into OData filter syntax
pub fn compile(filter: &Filter) -> Result<String> {
    let mut scope = Vec::new();
    let compiled = compile_node(filter, None, &mut scope)?;
    trace!("Compiled filter: {}", compiled);
    Ok(compiled)
}

/// Lambda variables bound by the enclosing quantifiers, innermost last
type Scope = Vec<String>;

fn compile_node(node: &Filter, parent: Option<BinaryOperator>, scope: &mut Scope) -> Result<String> {
    match node {
        Filter::Binary { op, left, right } => {
            let left = compile_node(left, Some(*op), scope)?;
            let right = compile_node(right, Some(*op), scope)?;
            let joined = format!("{} {} {}", left, op.symbol(), right);
            if *op == BinaryOperator::Or && parent == Some(BinaryOperator::And) {
                Ok(format!("({})", joined))
            } else {
                Ok(joined)
            }
        }
        Filter::Not(operand) => Ok(format!("not ({})", compile_node(operand, None, scope)?)),
        Filter::Member(path) => compile_path(path, scope),
        Filter::Literal(value) => Ok(format_literal(value)),
        Filter::Captured(captured) => Ok(format_literal(&captured.evaluate())),
        Filter::Method { name, target, args } => {
            compile_method(name, target.as_deref(), args, scope)
        }
        Filter::Quantifier {
            kind,
            collection,
            variable,
            predicate,
        } => compile_quantifier(*kind, collection, variable, predicate.as_deref(), scope),
        // Raw text may carry its own `or`; keep it grouped under a connective
        Filter::Raw(text) if parent.is_some_and(|op| op.is_logical()) => Ok(format!("({})", text)),
        Filter::Raw(text) => Ok(text.clone()),
    }
}

fn compile_path(path: &MemberPath, scope: &Scope) -> Result<String> {
    match &path.root {
        PathRoot::Entity => {
            if path.segments.is_empty() {
                return Err(ODataError::unsupported("member", "empty member path"));
            }
            Ok(path.segments.join("/"))
        }
        PathRoot::Variable(name) => {
            if !scope.iter().any(|bound| bound == name) {
                return Err(ODataError::unsupported(
                    "member",
                    format!(
                        "'{}' is not bound by an enclosing any/all; capture outside values with Filter::captured",
                        name
                    ),
                ));
            }
            if path.segments.is_empty() {
                Ok(name.clone())
            } else {
                Ok(format!("{}/{}", name, path.segments.join("/")))
            }
        }
    }
}

fn compile_method(
    name: &str,
    target: Option<&Filter>,
    args: &[Filter],
    scope: &mut Scope,
) -> Result<String> {
    match name.to_ascii_lowercase().as_str() {
        method @ ("contains" | "startswith" | "endswith") => {
            let receiver = target.ok_or_else(|| {
                ODataError::unsupported("method", format!("{} requires a receiver", method))
            })?;
            let [arg] = args else {
                return Err(ODataError::unsupported(
                    "method",
                    format!("{} takes exactly one argument, got {}", method, args.len()),
                ));
            };
            let receiver = compile_string_receiver(method, receiver, scope)?;
            let arg = compile_node(arg, None, scope)?;
            Ok(format!("{}({},{})", method, receiver, arg))
        }
        method @ ("tolower" | "toupper" | "trim") => {
            let receiver = match (target, args) {
                (Some(receiver), []) => receiver,
                (None, [receiver]) => receiver,
                _ => {
                    return Err(ODataError::unsupported(
                        "method",
                        format!("{} takes a single string operand", method),
                    ));
                }
            };
            let receiver = compile_string_receiver(method, receiver, scope)?;
            Ok(format!("{}({})", method, receiver))
        }
        "isnullorempty" => {
            let operand = match (target, args) {
                (None, [operand]) => operand,
                (Some(operand), []) => operand,
                _ => {
                    return Err(ODataError::unsupported(
                        "method",
                        "isNullOrEmpty takes a single operand",
                    ));
                }
            };
            let path = compile_node(operand, None, scope)?;
            Ok(format!("({0} eq null or {0} eq '')", path))
        }
        "in" => compile_in(target, args, scope),
        "any" | "all" => Err(ODataError::unsupported(
            "method",
            format!("{} must be expressed as a quantifier node", name),
        )),
        _ => Err(ODataError::unsupported("method", name.to_string())),
    }
}

/// The receiver of a string method must be a path or another string method
fn compile_string_receiver(method: &str, receiver: &Filter, scope: &mut Scope) -> Result<String> {
    match receiver {
        Filter::Member(path) => compile_path(path, scope),
        Filter::Method { name, target, args }
            if matches!(
                name.to_ascii_lowercase().as_str(),
                "tolower" | "toupper" | "trim"
            ) =>
        {
            compile_method(name, target.as_deref(), args, scope)
        }
        other => Err(ODataError::unsupported(
            "method",
            format!(
                "{} receiver must be a string property or string method, got {}",
                method,
                other.kind_name()
            ),
        )),
    }
}

fn compile_in(target: Option<&Filter>, args: &[Filter], scope: &mut Scope) -> Result<String> {
    let shape_error = || {
        ODataError::unsupported("method", "in requires a member path and a constant collection")
    };
    let (Some(receiver), [arg]) = (target, args) else {
        return Err(shape_error());
    };

    // Captured operands are evaluated once and reused for rendering
    let receiver = resolve_captured(receiver);
    let arg = resolve_captured(arg);

    // Either `path in (values)` or `values.contains(path)`
    let (path, values) = match (collection_items(&receiver), collection_items(&arg)) {
        (_, Some(values)) => (&receiver, values),
        (Some(values), None) => (&arg, values),
        (None, None) => return Err(shape_error()),
    };

    if values.is_empty() {
        return Ok("false".to_string());
    }

    let path = match path {
        Operand::Node(Filter::Member(member)) => compile_path(member, scope)?,
        Operand::Node(other) => compile_node(other, None, scope)?,
        Operand::Value(value) => format_literal(value),
    };
    let rendered: Vec<String> = values.iter().map(format_literal).collect();
    Ok(format!("{} in ({})", path, rendered.join(",")))
}

/// An `in` operand with any captured closure already evaluated
enum Operand<'a> {
    Node(&'a Filter),
    Value(FilterValue),
}

fn resolve_captured(node: &Filter) -> Operand<'_> {
    match node {
        Filter::Captured(captured) => Operand::Value(captured.evaluate()),
        other => Operand::Node(other),
    }
}

fn collection_items<'a>(operand: &'a Operand<'_>) -> Option<&'a [FilterValue]> {
    let value = match operand {
        Operand::Node(Filter::Literal(value)) => value,
        Operand::Value(value) => value,
        Operand::Node(_) => return None,
    };
    match value {
        FilterValue::Collection(items) => Some(items.as_slice()),
        _ => None,
    }
}

fn compile_quantifier(
    kind: QuantifierKind,
    collection: &MemberPath,
    variable: &str,
    predicate: Option<&Filter>,
    scope: &mut Scope,
) -> Result<String> {
    let path = compile_path(collection, scope)?;
    let Some(predicate) = predicate else {
        return Ok(format!("{}/{}()", path, kind.name()));
    };
    if variable.is_empty() {
        return Err(ODataError::unsupported(
            "quantifier",
            format!("{} with a predicate needs a lambda variable", kind.name()),
        ));
    }

    scope.push(variable.to_string());
    let inner = compile_node(predicate, None, scope);
    scope.pop();

    Ok(format!("{}/{}({}: {})", path, kind.name(), variable, inner?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn a() -> Filter {
        Filter::eq("A", 1)
    }
    fn b() -> Filter {
        Filter::eq("B", 2)
    }
    fn c() -> Filter {
        Filter::eq("C", 3)
    }
    fn d() -> Filter {
        Filter::eq("D", 4)
    }

    #[test]
    fn test_or_under_and_is_parenthesized() {
        let filter = a().and(b().or(c()));
        assert_eq!(compile(&filter).unwrap(), "A eq 1 and (B eq 2 or C eq 3)");
    }

    #[test]
    fn test_two_or_groups_under_and() {
        let filter = a().or(b()).and(c().or(d()));
        assert_eq!(
            compile(&filter).unwrap(),
            "(A eq 1 or B eq 2) and (C eq 3 or D eq 4)"
        );
    }

    #[test]
    fn test_bare_or_has_no_parentheses() {
        assert_eq!(compile(&b().or(c())).unwrap(), "B eq 2 or C eq 3");
        assert_eq!(
            compile(&a().or(b().and(c()))).unwrap(),
            "A eq 1 or B eq 2 and C eq 3"
        );
    }

    #[test]
    fn test_not() {
        let filter = !Filter::field("IsActive").cmp(BinaryOperator::Eq, Filter::value(true));
        assert_eq!(compile(&filter).unwrap(), "not (IsActive eq true)");
    }

    #[test]
    fn test_nested_member_path() {
        let filter = Filter::eq("Address/City", "Ghent");
        assert_eq!(compile(&filter).unwrap(), "Address/City eq 'Ghent'");
    }

    #[test]
    fn test_string_methods() {
        assert_eq!(
            compile(&Filter::contains("Name", "Bob")).unwrap(),
            "contains(Name,'Bob')"
        );
        assert_eq!(
            compile(&Filter::starts_with("Name", "O'B")).unwrap(),
            "startswith(Name,'O''B')"
        );
        assert_eq!(
            compile(&Filter::ends_with("Email", ".be")).unwrap(),
            "endswith(Email,'.be')"
        );

        let lowered = Filter::field("Name")
            .to_lower()
            .cmp(BinaryOperator::Eq, Filter::value("bob"));
        assert_eq!(compile(&lowered).unwrap(), "tolower(Name) eq 'bob'");

        let nested = Filter::field("Name")
            .trim()
            .to_upper()
            .call("startswith", vec![Filter::value("A")]);
        assert_eq!(compile(&nested).unwrap(), "startswith(toupper(trim(Name)),'A')");
    }

    #[test]
    fn test_string_method_receiver_must_be_path() {
        let bad = Filter::value("x").call("contains", vec![Filter::value("y")]);
        let err = compile(&bad).unwrap_err();
        assert!(matches!(err, ODataError::UnsupportedExpression { kind: "method", .. }));
    }

    #[test]
    fn test_in_operator() {
        assert_eq!(compile(&Filter::is_in("Id", [1, 2, 3])).unwrap(), "Id in (1,2,3)");
        assert_eq!(
            compile(&Filter::is_in("Code", ["a", "b"])).unwrap(),
            "Code in ('a','b')"
        );
        assert_eq!(
            compile(&Filter::is_in("Id", Vec::<i64>::new())).unwrap(),
            "false"
        );
    }

    #[test]
    fn test_in_with_collection_as_receiver() {
        let ids = vec![4, 5];
        let filter = Filter::captured(move || ids.clone().into()).call("in", vec![Filter::field("Id")]);
        assert_eq!(compile(&filter).unwrap(), "Id in (4,5)");
    }

    #[test]
    fn test_quantifiers() {
        let empty = Filter::has_any(MemberPath::entity("Orders"));
        assert_eq!(compile(&empty).unwrap(), "Orders/any()");

        let any = Filter::any(
            MemberPath::entity("Orders"),
            "o",
            Filter::var("o", "Total").cmp(BinaryOperator::Gt, Filter::value(100)),
        );
        assert_eq!(compile(&any).unwrap(), "Orders/any(o: o/Total gt 100)");

        let all = Filter::all(
            MemberPath::entity("Tags"),
            "t",
            Filter::var("t", "").cmp(BinaryOperator::Ne, Filter::value("spam")),
        );
        assert_eq!(compile(&all).unwrap(), "Tags/all(t: t ne 'spam')");
    }

    #[test]
    fn test_nested_quantifiers_thread_variables() {
        let inner = Filter::any(
            MemberPath::variable("o", "Lines"),
            "l",
            Filter::var("l", "Qty")
                .cmp(BinaryOperator::Ge, Filter::value(5))
                .and(Filter::var("o", "Status").cmp(BinaryOperator::Eq, Filter::value("Open"))),
        );
        let outer = Filter::any(MemberPath::entity("Orders"), "o", inner);
        assert_eq!(
            compile(&outer).unwrap(),
            "Orders/any(o: o/Lines/any(l: l/Qty ge 5 and o/Status eq 'Open'))"
        );
    }

    #[test]
    fn test_unbound_variable_is_rejected() {
        let filter = Filter::var("x", "Name").cmp(BinaryOperator::Eq, Filter::value("a"));
        assert!(matches!(
            compile(&filter),
            Err(ODataError::UnsupportedExpression { kind: "member", .. })
        ));
    }

    #[test]
    fn test_is_null_or_empty_inside_lambda() {
        let filter = Filter::any(
            MemberPath::entity("Contacts"),
            "c",
            Filter::is_null_or_empty(Filter::var("c", "Email")),
        );
        assert_eq!(
            compile(&filter).unwrap(),
            "Contacts/any(c: (c/Email eq null or c/Email eq ''))"
        );
    }

    #[test]
    fn test_captured_value_evaluated_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let filter = Filter::field("Price").cmp(
            BinaryOperator::Gt,
            Filter::captured(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                FilterValue::Float(9.5)
            }),
        );
        assert_eq!(compile(&filter).unwrap(), "Price gt 9.5");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_method_fails() {
        let filter = Filter::field("Name").call("soundex", vec![]);
        match compile(&filter) {
            Err(ODataError::UnsupportedExpression { detail, .. }) => assert_eq!(detail, "soundex"),
            other => panic!("expected unsupported expression, got {:?}", other),
        }
    }

    #[test]
    fn test_raw_is_verbatim() {
        assert_eq!(
            compile(&Filter::raw("year(Created) eq 2024")).unwrap(),
            "year(Created) eq 2024"
        );
        let compared = Filter::raw("year(Created)").cmp(BinaryOperator::Eq, Filter::value(2024));
        assert_eq!(compile(&compared).unwrap(), "year(Created) eq 2024");
    }

    #[test]
    fn test_raw_is_grouped_under_connectives() {
        let filter = Filter::raw("Status eq 'A' or Status eq 'B'").and(Filter::eq("Price", 10));
        assert_eq!(
            compile(&filter).unwrap(),
            "(Status eq 'A' or Status eq 'B') and Price eq 10"
        );
        assert_eq!(
            compile(&a().or(Filter::raw("B eq 2"))).unwrap(),
            "A eq 1 or (B eq 2)"
        );
    }

    #[test]
    fn test_in_evaluates_captured_operands_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let filter = Filter::captured(|| vec![1, 5].into()).call(
            "in",
            vec![Filter::captured(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                FilterValue::Int(5)
            })],
        );
        assert_eq!(compile(&filter).unwrap(), "5 in (1,5)");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
