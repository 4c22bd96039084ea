//! Method tag contract
//!
//! Every tag is four ASCII characters packed big-endian into one word.
//! Tags from all interfaces share one space and must stay distinct, since
//! a capability may be asked anything.

use fs_view::{marshal, namespace};
use remote_ipc::{METHOD_MAKE_CONN, OP_DROP, OP_INVOKE};
use services_fs_view::{log, maker, protocol};

/// Every tag a peer may send, with its spelling
pub fn all_tags() -> Vec<(u32, &'static str)> {
    vec![
        // Replies and call wrapping
        (ipc::METHOD_OK, "Okay"),
        (ipc::METHOD_FAIL, "Fail"),
        (ipc::METHOD_CALL, "Call"),
        // Filesystem objects
        (marshal::METHOD_OBJ_TYPE, "Fsty"),
        (marshal::METHOD_STAT, "Fsst"),
        (marshal::METHOD_UTIMES, "Fsut"),
        (marshal::METHOD_CHMOD, "Fsch"),
        (marshal::METHOD_OPEN, "Fopn"),
        (marshal::METHOD_CONNECT, "Fcon"),
        (marshal::METHOD_TRAVERSE, "Ftrv"),
        (marshal::METHOD_LIST, "Flst"),
        (marshal::METHOD_CREATE_FILE, "Fcrt"),
        (marshal::METHOD_MKDIR, "Fmkd"),
        (marshal::METHOD_SYMLINK, "Fsym"),
        (marshal::METHOD_RENAME, "Fren"),
        (marshal::METHOD_LINK, "Flnk"),
        (marshal::METHOD_UNLINK, "Fulk"),
        (marshal::METHOD_RMDIR, "Frmd"),
        (marshal::METHOD_BIND, "Fbnd"),
        (marshal::METHOD_READLINK, "Frdl"),
        // Namespace nodes
        (namespace::METHOD_NS_ATTACH, "Nsat"),
        (namespace::METHOD_NS_SYMLINK, "Nssl"),
        (namespace::METHOD_NS_DIR, "Nsdr"),
        // FS-operation server
        (protocol::METHOD_OPEN, "Open"),
        (protocol::METHOD_STAT, "Stat"),
        (protocol::METHOD_LSTAT, "Lstt"),
        (protocol::METHOD_READLINK, "Rdlk"),
        (protocol::METHOD_MKDIR, "Mkdr"),
        (protocol::METHOD_SYMLINK, "Syml"),
        (protocol::METHOD_RENAME, "Renm"),
        (protocol::METHOD_LINK, "Link"),
        (protocol::METHOD_UNLINK, "Unlk"),
        (protocol::METHOD_RMDIR, "Rmdr"),
        (protocol::METHOD_CHMOD, "Chmd"),
        (protocol::METHOD_UTIMES, "Utim"),
        (protocol::METHOD_CHDIR, "Chdr"),
        (protocol::METHOD_GETCWD, "Gcwd"),
        (protocol::METHOD_DIR_LIST, "Dirl"),
        (protocol::METHOD_ACCESS, "Accs"),
        (protocol::METHOD_CONNECT, "Conn"),
        (protocol::METHOD_BIND, "Bind"),
        (protocol::METHOD_EXEC, "Exec"),
        (protocol::METHOD_FORK, "Fork"),
        (protocol::METHOD_GET_ROOT, "Groo"),
        (protocol::METHOD_GET_DIR, "Gdir"),
        (protocol::METHOD_RESOLVE_OBJ, "Robj"),
        (protocol::METHOD_RESOLVE_DIR, "Rdir"),
        (protocol::METHOD_RESOLVE_POPULATE, "Rpop"),
        (protocol::METHOD_LOG_STREAM, "Glog"),
        (protocol::METHOD_SET_LOGGING, "Slog"),
        // Makers and log stream
        (maker::METHOD_MAKE_UNION, "Mkun"),
        (maker::METHOD_MAKE_COW, "Mkcw"),
        (maker::METHOD_MAKE_READ_ONLY, "Mkro"),
        (maker::METHOD_MAKE_FS_OP, "Mfos"),
        (maker::METHOD_MAKE_NS_NODE, "Nsmk"),
        (METHOD_MAKE_CONN, "Mkco"),
        (log::METHOD_LOG_LINE, "Logl"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::verify_tag;
    use std::collections::HashSet;

    #[test]
    fn test_tag_spellings() {
        for (tag, name) in all_tags() {
            verify_tag(tag, name);
        }
    }

    #[test]
    fn test_tags_are_distinct() {
        let tags = all_tags();
        let unique: HashSet<u32> = tags.iter().map(|(tag, _)| *tag).collect();
        assert_eq!(unique.len(), tags.len(), "Two interfaces share a method tag");
    }

    #[test]
    fn test_connection_operations() {
        verify_tag(OP_INVOKE, "Invk");
        verify_tag(OP_DROP, "Drop");
        assert!(all_tags().iter().all(|(tag, _)| *tag != OP_INVOKE && *tag != OP_DROP));
    }
}
