//! 命令行集成测试
//!
//! 所有用例都在临时目录中运行，并清除可能影响配置的环境变量，不会访问网络

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use tempfile::TempDir;

/// 隔离的命令：工作目录和 HOME 都指向临时目录
fn isolated_command(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("llm-html-rewriter").unwrap();
    cmd.current_dir(home)
        .env("HOME", home)
        .env("XDG_CACHE_HOME", home.join("xdg-cache"))
        .env("NO_COLOR", "true")
        .env_remove("OPENAI_API_KEY")
        .env_remove("GEMINI_API_KEY")
        .env_remove("LLM_HTML_LOCAL_URL")
        .env_remove("LLM_HTML_CACHE_DIR")
        .env_remove("LLM_HTML_CACHE_TTL")
        .env_remove("LLM_HTML_CACHE_MAX_ENTRIES")
        .env_remove("LLM_HTML_LOG_LEVEL");
    cmd
}

fn cache_dir_arg(home: &TempDir) -> String {
    home.path().join("cache").to_string_lossy().into_owned()
}

/// 测试帮助信息
#[test]
fn test_help_lists_options() {
    let home = TempDir::new().unwrap();
    let output = isolated_command(home.path()).arg("--help").output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for option in ["--task", "--language", "--no-cache", "--clear-cache", "--recursive"] {
        assert!(stdout.contains(option), "帮助信息缺少 {}", option);
    }
}

/// 测试缺少输入时报错
#[test]
fn test_input_is_required() {
    let home = TempDir::new().unwrap();
    isolated_command(home.path()).assert().failure();
}

/// 测试只清空缓存
#[test]
fn test_clear_cache_without_input() {
    let home = TempDir::new().unwrap();

    isolated_command(home.path())
        .args(["--clear-cache", "--cache-dir", &cache_dir_arg(&home)])
        .assert()
        .success();

    assert!(home.path().join("cache").join("responses.redb").exists());
}

/// 测试过小的文档不需要生成客户端，原样写出
#[test]
fn test_tiny_document_is_left_alone() {
    let home = TempDir::new().unwrap();
    let input = home.path().join("tiny.html");
    let output = home.path().join("out.html");
    fs::write(&input, "<p>a</p>").unwrap();

    isolated_command(home.path())
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .args(["--cache-dir", &cache_dir_arg(&home)])
        .assert()
        .success();

    assert_eq!(fs::read_to_string(&output).unwrap(), "<p>a</p>");
}

/// 测试缺少 API 密钥时失败，输入文件保持不变，统计文件记录错误
#[test]
fn test_missing_api_key_fails() {
    let home = TempDir::new().unwrap();
    let input = home.path().join("page.html");
    let stats = home.path().join("stats.json");
    let html = "<html><body><p>Some text that needs rewriting</p></body></html>";
    fs::write(&input, html).unwrap();

    isolated_command(home.path())
        .arg(&input)
        .args(["--backend", "openai", "--no-cache"])
        .arg("--stats-file")
        .arg(&stats)
        .assert()
        .failure();

    assert_eq!(fs::read_to_string(&input).unwrap(), html);

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&stats).unwrap()).unwrap();
    assert_eq!(report["failed_files"], 1);
    assert_eq!(report["files"][0]["status"], "error");
    assert!(report["files"][0]["error"]
        .as_str()
        .unwrap()
        .contains("OPENAI_API_KEY"));
}

/// 测试目录模式：默认不进入子目录，`--recursive` 时保留相对路径
#[test]
fn test_directory_mode() {
    let home = TempDir::new().unwrap();
    let input = home.path().join("site");
    let nested = input.join("docs");
    fs::create_dir_all(&nested).unwrap();
    fs::write(input.join("index.html"), "<p>a</p>").unwrap();
    fs::write(input.join("notes.txt"), "not html").unwrap();
    fs::write(nested.join("page.htm"), "<p>b</p>").unwrap();

    let flat = home.path().join("flat");
    isolated_command(home.path())
        .arg(&input)
        .arg("-o")
        .arg(&flat)
        .arg("--no-cache")
        .assert()
        .success();
    assert!(flat.join("index.html").exists());
    assert!(!flat.join("notes.txt").exists());
    assert!(!flat.join("docs").join("page.htm").exists());

    let deep = home.path().join("deep");
    isolated_command(home.path())
        .arg(&input)
        .arg("-o")
        .arg(&deep)
        .args(["--no-cache", "--recursive"])
        .assert()
        .success();
    assert_eq!(
        fs::read_to_string(deep.join("docs").join("page.htm")).unwrap(),
        "<p>b</p>"
    );
}

/// 测试指定的配置文件不存在时报错
#[test]
fn test_missing_config_file() {
    let home = TempDir::new().unwrap();
    let input = home.path().join("tiny.html");
    fs::write(&input, "<p>a</p>").unwrap();

    let output = isolated_command(home.path())
        .arg(&input)
        .args(["--config", "does-not-exist.toml"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("配置文件不存在"));
}

/// 测试无效的任务名由参数解析拒绝
#[test]
fn test_unknown_task_is_rejected() {
    let home = TempDir::new().unwrap();
    isolated_command(home.path())
        .args(["page.html", "--task", "translate"])
        .assert()
        .failure();
}
