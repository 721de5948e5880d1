use anyhow::{bail, Context, Result};
use env_logger::Env;
use rocketsql_storage::codec::{encode_key, FieldValue};
use rocketsql_storage::kv::Database;

const DEFAULT_PAGE_SIZE: usize = 512;

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = std::env::args().collect::<Vec<_>>();
    match args.len() {
        0 | 1 => bail!("Missing <database path> and <command>"),
        2 => bail!("Missing <command>"),
        _ => {}
    }

    let mut db = Database::open(&args[1], DEFAULT_PAGE_SIZE)
        .with_context(|| format!("opening database at {}", &args[1]))?;

    let command = args[2].as_str();
    match command {
        "tables" => {
            let names = db.table_names()?;
            println!("{}", names.join(", "));
        }
        "create" => {
            let table = arg(&args, 3, "create <table>")?;
            let root = db.create_table(table)?;
            println!("created table '{table}' (root page {root})");
        }
        "droptable" => {
            let table = arg(&args, 3, "droptable <table>")?;
            let rows = db.drop_table(table)?;
            println!("dropped '{table}', freed {rows} rows");
        }
        "insert" => {
            let table = arg(&args, 3, "insert <table> <key> <value>")?;
            let key = arg(&args, 4, "insert <table> <key> <value>")?;
            let value = arg(&args, 5, "insert <table> <key> <value>")?;
            let root = db.table_root(table)?;
            let key_bytes = encode_key(&[FieldValue::Int(key.parse()?)]);
            db.insert(root, &key_bytes, value.as_bytes())?;
        }
        "get" => {
            let table = arg(&args, 3, "get <table> <key>")?;
            let key = arg(&args, 4, "get <table> <key>")?;
            let root = db.table_root(table)?;
            let key_bytes = encode_key(&[FieldValue::Int(key.parse()?)]);
            let value = db.get(root, &key_bytes)?;
            println!("{}", String::from_utf8_lossy(&value));
        }
        "delete" => {
            let table = arg(&args, 3, "delete <table> <key>")?;
            let key = arg(&args, 4, "delete <table> <key>")?;
            let root = db.table_root(table)?;
            let key_bytes = encode_key(&[FieldValue::Int(key.parse()?)]);
            db.delete(root, &key_bytes)?;
        }
        "scan" => {
            let table = arg(&args, 3, "scan <table>")?;
            let root = db.table_root(table)?;
            let mut it = db.first(root)?;
            let mut count = 0;
            while let Some(value) = it.next()? {
                println!("{}", String::from_utf8_lossy(&value));
                count += 1;
            }
            println!("{count} rows");
        }
        "truncate" => {
            let table = arg(&args, 3, "truncate <table>")?;
            let root = db.table_root(table)?;
            let rows = db.truncate_tree(root)?;
            println!("truncated '{table}', freed {rows} rows");
        }
        "rebuild" => {
            let table = arg(&args, 3, "rebuild <table>")?;
            let root = db.table_root(table)?;
            db.rebuild_tree(root)?;
            println!("rebuilt '{table}'");
        }
        _ => bail!("Unknown command: {command}"),
    }

    db.close()?;
    Ok(())
}

fn arg<'a>(args: &'a [String], i: usize, usage: &str) -> Result<&'a str> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("usage: {usage}"))
}
