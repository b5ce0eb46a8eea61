//! Users and groups.

use std::collections::BTreeSet;

use tracing::debug;

use super::io_err;
use crate::error::Result;
use crate::config::Accounts;
use crate::model::Ownership;
use crate::tree::WorkTree;

const PASSWD: &str = "etc/passwd";
const GROUP: &str = "etc/group";

fn existing_names(content: &str) -> BTreeSet<String> {
    content
        .lines()
        .filter_map(|l| l.split(':').next())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect()
}

fn read_or_empty(tree: &WorkTree, path: &str) -> Result<String> {
    if tree.exists(path) {
        tree.read_to_string(path).map_err(|e| io_err(format!("reading {path}"), e))
    } else {
        Ok(String::new())
    }
}

fn append_lines(content: &mut String, lines: &[String]) {
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    for line in lines {
        content.push_str(line);
        content.push('\n');
    }
}

/// Append configured groups and users and create home directories.
///
/// Entries already present under the same name are kept as they are.
pub fn apply_accounts(tree: &mut WorkTree, accounts: &Accounts) -> Result<()> {
    let mut group = read_or_empty(tree, GROUP)?;
    let mut known = existing_names(&group);
    let new_groups: Vec<String> = accounts
        .groups
        .iter()
        .filter(|g| known.insert(g.groupname.clone()))
        .map(|g| format!("{}:x:{}:{}", g.groupname, g.gid, g.members.join(",")))
        .collect();
    append_lines(&mut group, &new_groups);
    tree.write_file(GROUP, group.as_bytes(), 0o644)
        .map_err(|e| io_err(format!("writing {GROUP}"), e))?;

    let mut passwd = read_or_empty(tree, PASSWD)?;
    let mut known = existing_names(&passwd);
    let mut new_users = Vec::new();
    for user in &accounts.users {
        if !known.insert(user.username.clone()) {
            debug!(user = %user.username, "user already present");
            continue;
        }
        let home = user.home();
        new_users.push(format!(
            "{name}:x:{uid}:{gid}:{name}:{home}:{shell}",
            name = user.username,
            uid = user.uid,
            gid = user.primary_gid(),
            shell = user.login_shell(),
        ));

        tree.create_dir_all(&home, 0o755)
            .map_err(|e| io_err(format!("creating home {home}"), e))?;
        tree.set_ownership(
            &home,
            Ownership::root(0o755).with_ids(user.uid, user.primary_gid()),
        )
        .map_err(|e| io_err(format!("recording ownership of {home}"), e))?;
    }
    append_lines(&mut passwd, &new_users);
    tree.write_file(PASSWD, passwd.as_bytes(), 0o644)
        .map_err(|e| io_err(format!("writing {PASSWD}"), e))?;

    debug!(
        groups = new_groups.len(),
        users = new_users.len(),
        "accounts applied"
    );
    Ok(())
}
