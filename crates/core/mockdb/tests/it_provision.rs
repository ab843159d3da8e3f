//! Provisioning through real processes, with shell scripts standing in for
//! the MySQL tools.

#![cfg(unix)]

use std::{os::unix::fs::PermissionsExt as _, path::Path, time::Duration};

use fs_err as fs;
use mockdb::{BuilderSettings, MockService, Options, Readiness, TemplateSource};

const FAKE_MYSQLDUMP: &str = r#"#!/bin/sh
echo "$@" > "$(dirname "$0")/dump-args.txt"
echo "mysqldump: [Warning] Using a password on the command line interface can be insecure." >&2
echo "CREATE TABLE t (id INT);"
echo "CREATE DEFINER=app@'%' PROCEDURE p() SELECT 1;"
"#;

const FAKE_MYSQLD: &str = r#"#!/bin/sh
for arg in "$@"; do
    case "$arg" in
        --datadir=*) datadir="${arg#--datadir=}" ;;
    esac
done
if [ "$1" = "--initialize-insecure" ]; then
    if [ -n "$(ls -A "$datadir")" ]; then
        echo "--initialize specified but the data directory has files in it" >&2
        exit 1
    fi
    mkdir -p "$datadir/mysql" && touch "$datadir/mysql.ibd" "$datadir/ibdata1"
    exit 0
fi
echo "mysqld ready for connections"
exec sleep 600
"#;

const FAKE_MYSQL_UPGRADE: &str = r#"#!/bin/sh
echo "$@" > "$(dirname "$0")/upgrade-args.txt"
"#;

const FAKE_MYSQL: &str = r#"#!/bin/sh
cat > "$(dirname "$0")/loaded.sql"
"#;

fn write_tool(dir: &Path, name: &str, script: &str) {
    let path = dir.join(name);
    fs::write(&path, script).expect("tool script should be written");
    fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("tool script should be made executable");
}

#[test]
fn provision_with_script_tools_serves_snapshot() {
    //* Given
    let bin = tempfile::tempdir().expect("tool directory should be created");
    write_tool(bin.path(), "mysqldump", FAKE_MYSQLDUMP);
    write_tool(bin.path(), "mysqld", FAKE_MYSQLD);
    write_tool(bin.path(), "mysql_upgrade", FAKE_MYSQL_UPGRADE);
    write_tool(bin.path(), "mysql", FAKE_MYSQL);

    let service = MockService::new(BuilderSettings {
        bootstrap_settle: Duration::ZERO,
        relaunch_settle: Duration::ZERO,
        readiness: Readiness::FixedDelay,
        template: TemplateSource::Embedded,
        benign_stderr: Default::default(),
        keep_staging: false,
        default_bin_location: Some(bin.path().to_path_buf()),
    });

    let options = Options::from([
        ("mockPort".to_string(), "33071".to_string()),
        ("user".to_string(), "app".to_string()),
        ("password".to_string(), "s3cret".to_string()),
    ]);
    let request = service
        .resolve("mysql+mock://127.0.0.1:3306/shop", &options)
        .expect("url should resolve")
        .expect("url should be recognized");

    //* When
    let instance = service
        .get_or_build(&request)
        .expect("provisioning should succeed");

    //* Then
    assert_eq!(instance.target().to_string(), "mysql://localhost:33071/shop");
    assert!(instance.daemon_pid().is_some(), "server should be running");

    let dump_args = fs::read_to_string(bin.path().join("dump-args.txt"))
        .expect("dump tool should have run");
    assert_eq!(
        dump_args.trim(),
        "-h 127.0.0.1 -P 3306 -u app -ps3cret --routines=true --events -d shop"
    );

    let upgrade_args = fs::read_to_string(bin.path().join("upgrade-args.txt"))
        .expect("upgrade tool should have run");
    assert!(upgrade_args.starts_with("-u root --socket="));
    assert!(upgrade_args.trim().ends_with("-P 33071 --force"));

    let loaded = fs::read_to_string(bin.path().join("loaded.sql"))
        .expect("client tool should have received the snapshot");
    assert_eq!(loaded, instance.snapshot_ddl());
    assert!(loaded.starts_with("DROP DATABASE IF EXISTS shop;"));
    assert!(loaded.contains("CREATE DEFINER=`root`@`localhost` PROCEDURE p()"));

    let staging = instance.staging().root().to_path_buf();
    assert!(
        staging.join("data").join("mysql.ibd").is_file(),
        "skeleton template should be initialized by the server"
    );

    service.shutdown();
    assert_eq!(instance.daemon_pid(), None, "server should be stopped");
    assert!(!staging.exists(), "staging should be removed");
}
