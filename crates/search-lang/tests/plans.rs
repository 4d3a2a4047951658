use insta::assert_snapshot;
use pretty_assertions::assert_eq;
use search_lang::{Direction, Engine, Error, Plan, UniqueMode, Value};

fn compile(query: &str) -> Plan {
    Engine::cards().compile(query).unwrap()
}

fn order(plan: &Plan) -> Vec<(String, Direction, bool)> {
    plan.order_by
        .iter()
        .map(|t| (t.expr.clone(), t.dir, t.nulls_last))
        .collect()
}

#[test]
fn test_types_colors_and_cmc() {
    let plan = compile("t:creature c:r cmc<=3");
    assert_snapshot!(
        plan.predicate_sql,
        @"types ? :p0 AND colors ? :p1 AND cmc <= :p2"
    );
    assert_eq!(
        plan.parameters.clone().into_iter().collect::<Vec<_>>(),
        vec![
            ("p0".to_string(), Value::String("Creature".to_string())),
            ("p1".to_string(), Value::String("R".to_string())),
            ("p2".to_string(), Value::Int(3)),
        ]
    );
    assert_eq!(plan.limit, 100);
    assert_eq!(plan.unique, UniqueMode::Cards);
    assert_eq!(
        order(&plan),
        vec![
            ("oracle_id".to_string(), Direction::Asc, false),
            ("prefer_score".to_string(), Direction::Desc, false),
            ("released_at".to_string(), Direction::Desc, false),
            ("edhrec_rank".to_string(), Direction::Asc, true),
        ]
    );
}

#[test]
fn test_quoted_name_pattern() {
    let plan = compile(r#"name:"Lightning Bolt""#);
    assert_snapshot!(
        plan.predicate_sql,
        @"LOWER(card_name) LIKE LOWER('%' || :p0 || '%')"
    );
    assert_eq!(
        plan.parameters["p0"],
        Value::String("lightning bolt".to_string())
    );
}

#[test]
fn test_power_equals_toughness() {
    let plan = compile("power=toughness");
    assert_snapshot!(
        plan.predicate_sql,
        @"creature_power IS NOT NULL AND creature_toughness IS NOT NULL AND creature_power = creature_toughness"
    );
    assert!(plan.parameters.is_empty());
}

#[test]
fn test_tags_sets_and_directives() {
    let plan = compile("-is:dfc (set:ktk or set:bfz) order:released direction:asc unique:prints");
    assert_snapshot!(
        plan.predicate_sql,
        @"NOT (is_tags ? :p0) AND (set_code = :p1 OR set_code = :p2)"
    );
    assert_eq!(plan.parameters["p0"], Value::String("dfc".to_string()));
    assert_eq!(plan.parameters["p1"], Value::String("ktk".to_string()));
    assert_eq!(plan.parameters["p2"], Value::String("bfz".to_string()));
    assert_eq!(plan.unique, UniqueMode::Prints);
    assert_eq!(
        order(&plan),
        vec![
            ("released_at".to_string(), Direction::Asc, false),
            ("edhrec_rank".to_string(), Direction::Asc, true),
        ]
    );
}

#[test]
fn test_negation_distributes_over_or() {
    let plan = compile("not (t:land or t:token)");
    assert_snapshot!(
        plan.predicate_sql,
        @"NOT (types ? :p0) AND NOT (types ? :p1)"
    );
    assert_eq!(plan.parameters["p0"], Value::String("Land".to_string()));
    assert_eq!(plan.parameters["p1"], Value::String("Token".to_string()));
}

#[test]
fn test_negation_of_nullable_text_accepts_null() {
    let plan = compile("-o:draw");
    assert_snapshot!(
        plan.predicate_sql,
        @"(oracle_text IS NULL OR NOT (LOWER(oracle_text) LIKE LOWER('%' || :p0 || '%')))"
    );
}

#[test]
fn test_negated_comparison_keeps_null_guards() {
    let plan = compile("-power=toughness");
    assert_snapshot!(
        plan.predicate_sql,
        @"creature_power IS NOT NULL AND creature_toughness IS NOT NULL AND NOT (creature_power = creature_toughness)"
    );
}

#[test]
fn test_arithmetic_comparison() {
    let plan = compile("cmc+1<power");
    assert_snapshot!(
        plan.predicate_sql,
        @"creature_power IS NOT NULL AND (cmc + :p0) < creature_power"
    );
    assert_eq!(plan.parameters["p0"], Value::Int(1));
}

#[test]
fn test_numeric_range() {
    let plan = compile("cmc>=3 cmc<=5");
    assert_snapshot!(plan.predicate_sql, @"cmc >= :p0 AND cmc <= :p1");
    assert_eq!(plan.parameters["p0"], Value::Int(3));
    assert_eq!(plan.parameters["p1"], Value::Int(5));
}

#[test]
fn test_color_superset_and_strict_subset() {
    let plan = compile("color>=uw");
    assert_snapshot!(plan.predicate_sql, @"colors @> :p0");
    assert_eq!(plan.parameters["p0"], Value::ColorSet("WU".to_string()));

    let plan = compile("color<rg");
    assert_snapshot!(plan.predicate_sql, @"(colors <@ :p0 AND color_count < :p1)");
    assert_eq!(plan.parameters["p0"], Value::ColorSet("RG".to_string()));
    assert_eq!(plan.parameters["p1"], Value::Int(2));
}

#[test]
fn test_colorless_and_multicolored() {
    assert_snapshot!(compile("c:c").predicate_sql, @"color_count = 0");
    assert_snapshot!(compile("c:m").predicate_sql, @"color_count >= 2");
}

#[test]
fn test_legality_map() {
    let plan = compile("f:modern");
    assert_snapshot!(plan.predicate_sql, @"legalities ->> :p0 = :p1");
    assert_eq!(plan.parameters["p0"], Value::String("modern".to_string()));
    assert_eq!(plan.parameters["p1"], Value::String("legal".to_string()));

    let plan = compile("banned:legacy");
    assert_eq!(plan.parameters["p1"], Value::String("banned".to_string()));
}

#[test]
fn test_mana_cost_subset() {
    let plan = compile("m:2uu");
    assert_snapshot!(plan.predicate_sql, @"mana_cost @> :p0");
    assert_eq!(
        plan.parameters["p0"],
        Value::StringArray(vec![
            "{2}".to_string(),
            "{U}".to_string(),
            "{U}".to_string(),
        ])
    );
}

#[test]
fn test_rarity_ordering_compiles_to_ranks() {
    let plan = compile("r>=rare");
    assert_snapshot!(plan.predicate_sql, @"rarity_rank >= :p0");
    assert_eq!(plan.parameters["p0"], Value::Int(2));
}

#[test]
fn test_date_and_year() {
    let plan = compile("date>=2015-03-27");
    assert_snapshot!(plan.predicate_sql, @"released_at >= :p0");
    assert_eq!(plan.parameters["p0"], Value::String("2015-03-27".to_string()));

    let plan = compile("year<=1997");
    assert_snapshot!(plan.predicate_sql, @"release_year <= :p0");
}

#[test]
fn test_wildcard_maps_to_like() {
    let plan = compile("name:bol*");
    assert_eq!(plan.parameters["p0"], Value::String("bol%".to_string()));
}

#[test]
fn test_bareword_searches_names() {
    let plan = compile("goblin");
    assert_snapshot!(
        plan.predicate_sql,
        @"LOWER(card_name) LIKE LOWER('%' || :p0 || '%')"
    );
    assert_eq!(plan.parameters["p0"], Value::String("goblin".to_string()));
}

#[test]
fn test_empty_query_compiles_to_true() {
    let plan = compile("");
    assert_snapshot!(plan.predicate_sql, @"TRUE");
    assert!(plan.parameters.is_empty());
}

#[test]
fn test_limit_is_clamped() {
    assert_eq!(compile("limit:50").limit, 50);
    assert_eq!(compile("limit:5000").limit, 1000);
}

#[test]
fn test_prefer_oldest_flips_recency() {
    let plan = compile("prefer:oldest");
    assert_eq!(
        order(&plan),
        vec![
            ("oracle_id".to_string(), Direction::Asc, false),
            ("prefer_score".to_string(), Direction::Desc, false),
            ("released_at".to_string(), Direction::Asc, false),
            ("edhrec_rank".to_string(), Direction::Asc, true),
        ]
    );
}

#[test]
fn test_prefer_contradicts_unique_prints() {
    let err = Engine::cards().compile("prefer:newest unique:prints").unwrap_err();
    assert!(matches!(err, Error::ValueParse { .. }), "got {err:?}");
}

#[test]
fn test_compilation_is_deterministic() {
    let engine = Engine::cards();
    let query = "t:creature (c:rg or c:wu) cmc+1<=power order:cmc";
    let a = engine.compile(query).unwrap();
    let b = engine.compile(query).unwrap();
    assert_eq!(a, b);
}
