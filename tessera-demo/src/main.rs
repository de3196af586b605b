//! Tessera Query Walkthrough
//!
//! Populates a person cache and times the query strategies against plain
//! in-memory filtering:
//! 1. Indexed lookups (equality, ranges, multiple criteria)
//! 2. Filter-only and scan queries
//! 3. Text search over resumes
//! 4. Field projections
//!
//! Then walks through key-value operations and transactions.
//!
//! `TESSERA_DEMO_PERSONS` sets the population size (default 10000);
//! engine settings come from the `TESSERA_*` variables, logging from
//! `RUST_LOG`.

mod model;
mod stopwatch;

use model::{organization_schema, person_schema, Organization, Person};
use stopwatch::StopWatch;
use tessera_core::{
    CacheConfig, ConfigError, EngineConfig, TesseraError, TesseraResult, TxConcurrency,
    TxIsolation, Value,
};
use tessera_storage::query::{eq, gt};
use tessera_storage::{Cache, Engine, FieldsQuery, IndexQuery, ScanQuery, TextQuery, TypedCache};
use tracing_subscriber::EnvFilter;

const PERSON_CACHE: &str = "Persons";
const ORG_CACHE: &str = "Organizations";
const DEFAULT_PERSONS: usize = 10_000;
const MAX_PERSONS: usize = 10_000_000;
const ORGS: i64 = 20;

fn main() -> TesseraResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Tessera Query Walkthrough ===\n");

    let engine = Engine::new(EngineConfig::from_env()?)?;
    let count = population_size()?;
    println!("✓ Engine started");
    println!("  Lock timeout: {:?}", engine.config().lock_timeout);
    println!("  Shards: {}", engine.config().shard_amount);

    let orgs = engine.get_or_create_cache(CacheConfig::new(ORG_CACHE).with_schema(organization_schema()))?;
    let persons = engine.get_or_create_cache(CacheConfig::new(PERSON_CACHE).with_schema(person_schema()))?;

    let people = populate(&orgs, &persons, count)?;
    println!("\n✓ Populated {} persons in {} organizations", persons.size(), orgs.size());

    let result = run(&engine, &persons, &people);

    engine.destroy_cache(PERSON_CACHE)?;
    engine.destroy_cache(ORG_CACHE)?;
    result?;

    println!("\n=== Walkthrough finished ===");
    Ok(())
}

fn run(engine: &Engine, persons: &Cache, people: &[Person]) -> TesseraResult<()> {
    let mut sw = StopWatch::new();
    index_queries(&mut sw, persons, people)?;
    filter_queries(&mut sw, persons, people)?;
    text_queries(&mut sw, persons, people)?;
    fields_query(&mut sw, persons)?;
    println!("\n{}", sw.pretty_print());

    key_value_operations(engine)?;
    transactions(engine)?;
    Ok(())
}

fn population_size() -> Result<usize, ConfigError> {
    parse_population(std::env::var("TESSERA_DEMO_PERSONS").ok())
}

fn parse_population(raw: Option<String>) -> Result<usize, ConfigError> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_PERSONS);
    };
    match raw.trim().parse::<usize>() {
        Ok(count) if (1..=MAX_PERSONS).contains(&count) => Ok(count),
        _ => Err(ConfigError::InvalidValue {
            field: "TESSERA_DEMO_PERSONS".to_string(),
            value: raw,
            reason: format!("expected an integer between 1 and {MAX_PERSONS}"),
        }),
    }
}

fn populate(orgs: &Cache, persons: &Cache, count: usize) -> TesseraResult<Vec<Person>> {
    orgs.remove_all()?;
    persons.remove_all()?;

    let typed_orgs: TypedCache<i64, Organization> = orgs.typed();
    for id in 1..=ORGS {
        let name = if id == 1 { "ACME".to_string() } else { format!("Org{id}") };
        typed_orgs.put(&id, &Organization { id, name })?;
    }

    let typed_persons: TypedCache<i64, Person> = persons.typed();
    let mut people = Vec::with_capacity(count);
    for i in (0i64..).take(count) {
        let person = Person::synthetic(i, ORGS);
        typed_persons.put(&person.id, &person)?;
        people.push(person);
    }
    tracing::info!(persons = count, organizations = ORGS, "Caches populated");
    Ok(people)
}

fn index_queries(sw: &mut StopWatch, persons: &Cache, people: &[Person]) -> TesseraResult<()> {
    println!("\n=== Index Queries ===");

    let expected = sw.time("in memory 1: orgId = 1", || people.iter().filter(|p| p.org_id == 1).count());
    let found = sw.time("cache 1: index orgId = 1", || -> TesseraResult<usize> {
        Ok(persons.query(IndexQuery::new().and(eq("orgId", 1)))?.get_all()?.len())
    })?;
    println!("✓ orgId = 1: {found} persons (in memory: {expected})");

    let typed: TypedCache<i64, Person> = persons.typed();
    let found = sw.time("cache 1.2: typed index orgId > 1", || -> TesseraResult<usize> {
        Ok(typed.query(IndexQuery::new().and(gt("orgId", 1)))?.try_get_all()?.len())
    })?;
    println!("✓ orgId > 1: {found} persons");

    let expected = sw.time("in memory 2: orgId = 2 and salary > 1500", || {
        people.iter().filter(|p| p.org_id == 2 && p.salary > 1500.0).count()
    });
    let found = sw.time("cache 2: index orgId = 2 and salary > 1500", || -> TesseraResult<usize> {
        let query = IndexQuery::new().and(eq("orgId", 2)).and(gt("salary", 1500.0));
        Ok(persons.query(query)?.get_all()?.len())
    })?;
    println!("✓ orgId = 2 and salary > 1500: {found} persons (in memory: {expected})");

    let expected = sw.time("in memory 3: salary > 1500", || people.iter().filter(|p| p.salary > 1500.0).count());
    let found = sw.time("cache 3: index salary > 1500", || -> TesseraResult<usize> {
        Ok(persons.query(IndexQuery::new().and(gt("salary", 1500.0)))?.get_all()?.len())
    })?;
    println!("✓ salary > 1500: {found} persons (in memory: {expected})");

    let expected = sw.time("in memory 4: salary > 1500 and Master", || {
        people
            .iter()
            .filter(|p| p.salary > 1500.0 && p.resume.contains("Master"))
            .count()
    });
    let mut rich_masters = sw.time("cache 4.1: index salary > 1500 with filter", || {
        persons.query(
            IndexQuery::new()
                .and(gt("salary", 1500.0))
                .filter(|_, v| field_str(v, "resume").is_some_and(|r| r.contains("Master"))),
        )
    })?;
    let found = sw.time("cache 4.2: iterate cursor once", || -> TesseraResult<usize> {
        Ok(rich_masters.iter()?.count())
    })?;
    println!("✓ salary > 1500 with Master: {found} persons (in memory: {expected})");
    if let Err(err) = rich_masters.get_all() {
        println!("  second pass over the cursor: {}", TesseraError::from(err));
    }
    Ok(())
}

fn field_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.as_record()?.field(field)?.as_str()
}

fn filter_queries(sw: &mut StopWatch, persons: &Cache, people: &[Person]) -> TesseraResult<()> {
    println!("\n=== Filter and Scan Queries ===");

    let expected = sw.time("in memory 5: lastName contains 10", || {
        people.iter().filter(|p| p.last_name.contains("10")).count()
    });
    let found = sw.time("cache 5: filter lastName contains 10", || -> TesseraResult<usize> {
        let query = IndexQuery::new().filter(|_, v| field_str(v, "lastName").is_some_and(|n| n.contains("10")));
        Ok(persons.query(query)?.into_items()?.count())
    })?;
    println!("✓ lastName contains \"10\": {found} persons (in memory: {expected})");

    let wanted = format!("John{}", people.len() / 2);
    let expected = sw.time("in memory 6: firstName equals", || {
        people.iter().filter(|p| p.first_name == wanted).count()
    });
    let scan_wanted = wanted.clone();
    let found = sw.time("cache 6: scan firstName equals", || -> TesseraResult<usize> {
        let query = ScanQuery::new(move |_, v| field_str(v, "firstName") == Some(scan_wanted.as_str()));
        Ok(persons.query(query)?.into_items()?.count())
    })?;
    println!("✓ firstName = {wanted}: {found} persons (in memory: {expected})");
    Ok(())
}

fn text_queries(sw: &mut StopWatch, persons: &Cache, people: &[Person]) -> TesseraResult<()> {
    println!("\n=== Text Queries ===");

    let expected = sw.time("in memory 7: resume contains Master", || {
        people.iter().filter(|p| p.resume.contains("Master")).count()
    });
    let masters = sw.time("cache 7: text Master", || -> TesseraResult<usize> {
        Ok(persons.query(TextQuery::new("Master"))?.get_all()?.len())
    })?;
    let bachelors = sw.time("cache 7.1: text Bachelor", || -> TesseraResult<usize> {
        Ok(persons.query(TextQuery::new("bachelor").in_field("resume"))?.get_all()?.len())
    })?;
    println!("✓ 'Master Degree': {masters} persons (in memory: {expected})");
    println!("✓ 'Bachelor Degree': {bachelors} persons");
    Ok(())
}

fn fields_query(sw: &mut StopWatch, persons: &Cache) -> TesseraResult<()> {
    println!("\n=== Fields Query ===");

    let rows = sw.time("cache 8: select firstName, salary where orgId = 1", || -> TesseraResult<Vec<Vec<Value>>> {
        let query = FieldsQuery::select(["firstName", "salary"]).and(eq("orgId", 1));
        Ok(persons.query_fields(query)?.get_all()?)
    })?;
    println!("✓ {} rows, first three:", rows.len());
    for row in rows.iter().take(3) {
        let cells: Vec<String> = row.iter().map(Value::to_string).collect();
        println!("  [{}]", cells.join(", "));
    }

    let all = sw.time("cache 9: select *", || -> TesseraResult<usize> {
        Ok(persons.query_fields(FieldsQuery::all())?.into_items()?.count())
    })?;
    println!("✓ select *: {all} rows");
    Ok(())
}

fn key_value_operations(engine: &Engine) -> TesseraResult<()> {
    println!("\n=== Key-Value Operations ===");

    let cache = engine.get_or_create_cache(CacheConfig::new("kv"))?;
    cache.put_all([(1, "a"), (2, "b")])?;
    println!("✓ put 1 -> a, 2 -> b; size = {}", cache.size());
    println!("✓ get 1 = {:?}", cache.get(1)?);
    println!("✓ replace(1, a, c) = {}", cache.replace(1, "a", "c")?);
    println!("✓ replace(1, a, d) = {}", cache.replace(1, "a", "d")?);
    println!("✓ put_if_absent(2, x) = {}", cache.put_if_absent(2, "x")?);
    match cache.insert(2, "x") {
        Ok(()) => println!("✓ insert(2, x) stored"),
        Err(err) => println!("✓ insert(2, x) rejected: {err}"),
    }
    cache.remove_all()?;
    println!("✓ remove_all; size = {}", cache.size());

    let stats = cache.stats();
    println!("  stats: {} puts, {} removals, hit rate {:.2}", stats.puts, stats.removals, stats.hit_rate());
    engine.destroy_cache("kv")?;
    Ok(())
}

fn transactions(engine: &Engine) -> TesseraResult<()> {
    println!("\n=== Transactions ===");

    let accounts = engine.get_or_create_cache(CacheConfig::new("accounts"))?;
    accounts.put_all([("alice", 100), ("bob", 50)])?;

    let moved: Result<i64, TesseraError> = engine.transactions().run_in_transaction(
        TxConcurrency::Pessimistic,
        TxIsolation::RepeatableRead,
        |tx| {
            let alice = accounts.get("alice")?.and_then(|v| v.as_i64()).unwrap_or(0);
            let bob = accounts.get("bob")?.and_then(|v| v.as_i64()).unwrap_or(0);
            accounts.put("alice", alice - 30)?;
            accounts.put("bob", bob + 30)?;
            tracing::info!(tx_id = %tx.id(), "Transfer buffered");
            Ok(30)
        },
    );
    println!("✓ pessimistic transfer of {} committed", moved?);

    let mut tx = engine.tx_start(TxConcurrency::Optimistic, TxIsolation::Serializable)?;
    let alice = accounts.get("alice")?.and_then(|v| v.as_i64()).unwrap_or(0);
    accounts.put("alice", alice - 10)?;
    std::thread::scope(|scope| {
        scope
            .spawn(|| accounts.put("alice", 0))
            .join()
            .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
    })?;
    match tx.commit() {
        Ok(()) => println!("✓ optimistic write committed"),
        Err(err) => println!("✓ optimistic commit rejected: {err}; state = {}", tx.state()),
    }
    println!(
        "  alice = {}, bob = {}",
        accounts.get("alice")?.unwrap_or(Value::Null),
        accounts.get("bob")?.unwrap_or(Value::Null)
    );

    engine.destroy_cache("accounts")?;
    Ok(())
}
