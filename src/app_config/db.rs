use std::env;

use anyhow::Context;
use once_cell::sync::OnceCell;
use rbatis::RBatis;
use rbdc_mysql::MysqlDriver;
use rbdc_sqlite::SqliteDriver;

static DB_CLIENT: OnceCell<RBatis> = OnceCell::new();

/// 初始化数据库连接池，重复调用时直接复用已有实例。
/// DATABASE_URL 以 sqlite 开头时走本地文件库，其余按MySQL处理。
pub async fn init_db() -> &'static RBatis {
    if let Some(rb) = DB_CLIENT.get() {
        return rb;
    }
    let url = env::var("DATABASE_URL").expect("DATABASE_URL config is none");
    let rb = RBatis::new();
    if url.starts_with("sqlite") {
        rb.link(SqliteDriver {}, &url)
            .await
            .expect("Failed to connect db");
        // sqlite写入需要串行化，连接数收敛到1
        rb.get_pool().unwrap().set_max_open_conns(1).await;
    } else {
        rb.link(MysqlDriver {}, &url)
            .await
            .expect("Failed to connect db");
        rb.get_pool().unwrap().set_max_open_conns(50).await;
    }

    let _ = DB_CLIENT.set(rb);
    DB_CLIENT.get().expect("DB_CLIENT is not initialized")
}

pub fn get_db_client() -> &'static RBatis {
    DB_CLIENT.get().expect("DB_CLIENT is not initialized")
}

/// 建表语句使用MySQL与sqlite的公共子集，时间一律存毫秒时间戳
const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS skill_definition (
        code VARCHAR(64) PRIMARY KEY,
        category VARCHAR(16) NOT NULL,
        name VARCHAR(128) NOT NULL,
        description TEXT,
        param_schema TEXT NOT NULL,
        default_params TEXT NOT NULL,
        enabled INTEGER NOT NULL,
        created_ts BIGINT NOT NULL,
        updated_ts BIGINT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS skill_instance (
        id VARCHAR(64) PRIMARY KEY,
        owner_id VARCHAR(64) NOT NULL,
        skill_code VARCHAR(64) NOT NULL,
        label VARCHAR(128),
        inst_id VARCHAR(32),
        params TEXT NOT NULL,
        order_qty DOUBLE NOT NULL,
        order_style VARCHAR(16) NOT NULL,
        priority INTEGER NOT NULL,
        status VARCHAR(16) NOT NULL,
        last_checked_ts BIGINT,
        triggered_ts BIGINT,
        last_error TEXT,
        created_ts BIGINT NOT NULL,
        updated_ts BIGINT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS execution_log (
        id VARCHAR(64) PRIMARY KEY,
        instance_id VARCHAR(64) NOT NULL,
        owner_id VARCHAR(64) NOT NULL,
        skill_code VARCHAR(64) NOT NULL,
        inst_id VARCHAR(32),
        action VARCHAR(16) NOT NULL,
        detail TEXT NOT NULL,
        observed_price DOUBLE,
        indicator_snapshot TEXT,
        order_outcome TEXT,
        created_ts BIGINT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS stop_watch (
        id VARCHAR(64) PRIMARY KEY,
        owner_id VARCHAR(64) NOT NULL,
        inst_id VARCHAR(32) NOT NULL,
        entry_price DOUBLE NOT NULL,
        quantity DOUBLE NOT NULL,
        stop_percent DOUBLE NOT NULL,
        mode VARCHAR(16) NOT NULL,
        current_stop_price DOUBLE NOT NULL,
        highest_observed_price DOUBLE NOT NULL,
        status VARCHAR(16) NOT NULL,
        fail_count INTEGER NOT NULL,
        last_error TEXT,
        created_ts BIGINT NOT NULL,
        updated_ts BIGINT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS broker_credential (
        id VARCHAR(64) PRIMARY KEY,
        owner_id VARCHAR(64) NOT NULL,
        broker VARCHAR(32) NOT NULL,
        label VARCHAR(128),
        app_key_enc TEXT NOT NULL,
        app_secret_enc TEXT NOT NULL,
        account_id_enc TEXT NOT NULL,
        simulated INTEGER NOT NULL,
        is_active INTEGER NOT NULL,
        created_ts BIGINT NOT NULL,
        updated_ts BIGINT NOT NULL
    )"#,
];

/// 幂等建表，进程启动时执行一次
pub async fn init_schema() -> anyhow::Result<()> {
    let rb = get_db_client();
    for ddl in SCHEMA {
        rb.exec(ddl, vec![]).await.context("建表失败")?;
    }
    Ok(())
}
