//! Per-binary knowledge: the read-only allow-list, binaries that always
//! mutate, and subcommand rules for multi-purpose tools.

use crate::argv::{flag_value, has_flag, has_short, positionals, short_letters};
use crate::classify::{CommandIntent, tags};

/// Inspection commands that never change state on their own.
const READ_ONLY: &[&str] = &[
    "cat", "head", "tail", "ls", "ll", "dir", "ps", "pstree", "free", "df", "du", "grep", "egrep",
    "fgrep", "rg", "zgrep", "wc", "cut", "tr", "column", "nl", "fold", "rev", "tac", "strings",
    "od", "hexdump", "xxd", "file", "stat", "readlink", "realpath", "basename", "dirname", "pwd",
    "cd", "echo", "printf", "true", "false", "test", "[", "sleep", "which", "whereis", "type",
    "id", "whoami", "who", "w", "users", "groups", "last", "lastlog", "uptime", "uname", "arch",
    "nproc", "lscpu", "lsmem", "lsblk", "blkid", "lspci", "lsusb", "lsmod", "lshw", "lsns",
    "dmidecode", "lsof", "ss", "netstat", "dig", "host", "nslookup", "getent", "ping", "ping6",
    "traceroute", "tracepath", "mtr", "arping", "printenv", "locale", "cal", "md5sum", "sha1sum",
    "sha256sum", "sha512sum", "cksum", "b2sum", "base64", "jq", "yq", "diff", "cmp", "comm",
    "zcat", "bzcat", "xzcat", "zstdcat", "locate", "tree", "numfmt", "seq", "expr", "findmnt",
    "vmstat", "iostat", "mpstat", "pidstat", "sar", "sensors", "lvs", "vgs", "pvs", "lvdisplay",
    "vgdisplay", "pvdisplay", "lvscan", "vgscan", "pvscan", "pveversion", "pveperf",
    "iptables-save", "ip6tables-save", "systemd-analyze", "systemd-cgls", "getfacl", "lsattr",
    "namei", "ldd", "readelf", "ipcs", "getconf", "pgrep", "pidof", "zipinfo", "nc", "ncat",
    "netcat", "apt-cache", "dpkg-query", "showmount", "tcpdump", "dmesg", "top", "iotop",
    "docker-compose", "xargs", "env", "timeout", "nice", "time", "uniq", "sort", "hwclock",
];

/// Binaries whose only purpose is to change state.
const KNOWN_WRITE: &[&str] = &[
    "rm", "rmdir", "mv", "cp", "dd", "shred", "truncate", "touch", "mkdir", "ln", "install",
    "chmod", "chown", "chgrp", "chattr", "setfacl", "useradd", "userdel", "usermod", "adduser",
    "deluser", "groupadd", "groupdel", "groupmod", "passwd", "chpasswd", "chage", "killall",
    "pkill", "shutdown", "reboot", "poweroff", "halt", "init", "telinit", "umount", "swapoff",
    "mkswap", "wipefs", "sfdisk", "sgdisk", "gdisk", "modprobe", "rmmod", "insmod", "depmod",
    "vzdump", "qmrestore", "pct-restore", "lvcreate", "lvremove", "lvextend", "lvreduce",
    "lvresize", "lvrename", "vgcreate", "vgremove", "vgextend", "vgreduce", "pvcreate",
    "pvremove", "pvmove", "gunzip", "bzip2", "bunzip2", "xz", "unxz", "zip", "zstd", "rsync",
    "scp", "patch", "at", "batch", "systemd-run", "update-grub", "grub-install",
    "update-initramfs", "dpkg-reconfigure", "fsck", "e2fsck", "resize2fs", "tune2fs",
    "xfs_repair", "losetup", "cryptsetup", "iptables-restore", "ip6tables-restore", "logger",
    "wall", "certbot", "pveam", "pveupgrade", "proxmox-boot-tool", "eval", "source", ".",
    "exportfs", "sync", "tee",
];

const DOCKER_VALUE_FLAGS: &[&str] = &[
    "-H", "--host", "-c", "--context", "--config", "-l", "--log-level", "-f", "--file", "-p",
    "--project-name", "--env-file", "--profile", "--project-directory",
];

const KUBECTL_VALUE_FLAGS: &[&str] = &[
    "-n", "--namespace", "--context", "--kubeconfig", "--cluster", "--user", "-s", "--server",
    "-l", "--selector", "-o", "--output", "-c", "--container",
];

pub(crate) fn docker_verbs<'a>(rest: &[&'a str]) -> (Option<&'a str>, Option<&'a str>) {
    let pos = positionals(rest, DOCKER_VALUE_FLAGS);
    (pos.first().copied(), pos.get(1).copied())
}

pub(crate) fn kubectl_verbs<'a>(rest: &[&'a str]) -> (Option<&'a str>, Option<&'a str>) {
    let pos = positionals(rest, KUBECTL_VALUE_FLAGS);
    (pos.first().copied(), pos.get(1).copied())
}

fn first_positional<'a>(rest: &[&'a str], value_flags: &[&str]) -> Option<&'a str> {
    positionals(rest, value_flags).first().copied()
}

fn read(detail: impl std::fmt::Display) -> Option<CommandIntent> {
    Some(CommandIntent::certain(detail))
}

fn write(detail: impl std::fmt::Display) -> Option<CommandIntent> {
    Some(CommandIntent::write(tags::WRITE_COMMAND, detail))
}

fn verdict(is_read: bool, cmd: &str, verb: Option<&str>) -> Option<CommandIntent> {
    let what = match verb {
        Some(v) => format!("{cmd} {v}"),
        None => cmd.to_string(),
    };
    if is_read {
        read(format!("{what} only inspects state"))
    } else {
        write(format!("{what} changes state"))
    }
}

/// Classify `cmd` from what is known about the binary.  `None` means the
/// binary is unknown.
pub(crate) fn classify_known(cmd: &str, rest: &[&str]) -> Option<CommandIntent> {
    if let Some(intent) = managed(cmd, rest) {
        return Some(intent);
    }
    if cmd.starts_with("mkfs") || KNOWN_WRITE.contains(&cmd) {
        return write(format!("{cmd} changes state"));
    }
    if READ_ONLY.contains(&cmd) {
        return read(format!("{cmd} only inspects state"));
    }
    None
}

fn managed(cmd: &str, rest: &[&str]) -> Option<CommandIntent> {
    match cmd {
        "docker" | "podman" | "nerdctl" => docker(cmd, rest),
        "docker-compose" => {
            let verb = first_positional(rest, DOCKER_VALUE_FLAGS);
            compose(cmd, verb)
        }
        "kubectl" | "oc" => kubectl(cmd, rest),
        "helm" => {
            let verb = first_positional(rest, &["-n", "--namespace", "--kube-context"]);
            let ok = match verb {
                Some("repo") => positionals(rest, &[]).get(1) == Some(&"list"),
                Some(v) => matches!(
                    v,
                    "list" | "ls" | "status" | "get" | "history" | "show" | "version" | "search" | "env"
                ),
                None => true,
            };
            verdict(ok, cmd, verb)
        }
        "systemctl" => {
            let verb = first_positional(
                rest,
                &["-H", "--host", "-M", "-p", "--property", "-t", "--type", "--state", "-n", "--lines", "-o", "--output"],
            );
            let ok = match verb {
                None => true,
                Some(v) => {
                    v.starts_with("list-")
                        || v.starts_with("is-")
                        || matches!(v, "status" | "show" | "cat" | "get-default" | "show-environment" | "help")
                }
            };
            verdict(ok, cmd, verb)
        }
        "service" => {
            let pos = positionals(rest, &[]);
            let ok = has_flag(rest, &["--status-all"]) || matches!(pos.get(1), None | Some(&"status"));
            verdict(ok, cmd, pos.get(1).copied())
        }
        "pct" => {
            let verb = first_positional(rest, &[]);
            let ok = matches!(
                verb,
                None | Some("config" | "list" | "status" | "df" | "pending" | "listsnapshot" | "help" | "cpusets")
            );
            verdict(ok, cmd, verb)
        }
        "qm" => {
            let pos = positionals(rest, &[]);
            let verb = pos.first().copied();
            let ok = match verb {
                None => true,
                Some("guest") => {
                    pos.get(1) == Some(&"cmd")
                        && pos.get(3).is_some_and(|c| {
                            c.starts_with("get-")
                                || matches!(*c, "info" | "ping" | "network-get-interfaces" | "fsfreeze-status")
                        })
                }
                Some(v) => matches!(
                    v,
                    "config" | "list" | "status" | "pending" | "listsnapshot" | "showcmd" | "help"
                ),
            };
            verdict(ok, cmd, verb)
        }
        "pvesh" => {
            let verb = first_positional(rest, &[]);
            verdict(matches!(verb, Some("get" | "ls" | "usage" | "help")), cmd, verb)
        }
        "pvesm" => {
            let verb = first_positional(rest, &[]);
            verdict(
                matches!(verb, None | Some("status" | "list" | "path" | "scan" | "help")),
                cmd,
                verb,
            )
        }
        "pvecm" => {
            let verb = first_positional(rest, &[]);
            verdict(matches!(verb, None | Some("status" | "nodes" | "help")), cmd, verb)
        }
        "pvesr" => {
            let verb = first_positional(rest, &[]);
            verdict(matches!(verb, None | Some("status" | "list" | "read" | "help")), cmd, verb)
        }
        "ha-manager" => {
            let verb = first_positional(rest, &[]);
            verdict(
                matches!(verb, None | Some("status" | "config" | "groupconfig" | "help")),
                cmd,
                verb,
            )
        }
        "ceph" => ceph(rest),
        "zfs" => {
            let verb = first_positional(rest, &[]);
            verdict(
                matches!(
                    verb,
                    None | Some(
                        "list" | "get" | "holds" | "userspace" | "groupspace" | "projectspace" | "diff" | "help" | "version"
                    )
                ),
                cmd,
                verb,
            )
        }
        "zpool" => {
            let pos = positionals(rest, &[]);
            let verb = pos.first().copied();
            let ok = match verb {
                None => true,
                Some("import") => pos.len() == 1 && !has_short(rest, 'a'),
                Some(v) => matches!(
                    v,
                    "list" | "status" | "get" | "history" | "iostat" | "events" | "help" | "version"
                ) && !(v == "events" && has_short(rest, 'c')),
            };
            verdict(ok, cmd, verb)
        }
        "ip" => {
            const IP_WRITE_VERBS: &[&str] = &[
                "add", "del", "delete", "change", "replace", "set", "flush", "append", "prepend",
                "restore", "exec", "attach", "detach", "update",
            ];
            let pos = positionals(rest, &["-n", "-netns", "--netns", "-b", "-batch"]);
            if pos.iter().any(|p| *p == "monitor") {
                return Some(CommandIntent::write(
                    tags::UNBOUNDED_STREAM,
                    "ip monitor streams events until interrupted",
                ));
            }
            let verb = pos.iter().find(|p| IP_WRITE_VERBS.contains(*p)).copied();
            verdict(verb.is_none() && !has_flag(rest, &["-batch", "-b"]), cmd, verb)
        }
        "iptables" | "ip6tables" | "iptables-legacy" | "iptables-nft" | "ebtables" | "arptables" => {
            const LONG_WRITE: &[&str] = &[
                "--append", "--delete", "--insert", "--replace", "--flush", "--delete-chain",
                "--new-chain", "--policy", "--zero", "--rename-chain",
            ];
            let mutates = has_flag(rest, LONG_WRITE)
                || rest
                    .iter()
                    .filter_map(|a| short_letters(a))
                    .any(|l| l.chars().any(|c| "ADIRFXNPZE".contains(c)));
            let lists = has_flag(rest, &["--list", "--list-rules"])
                || rest
                    .iter()
                    .filter_map(|a| short_letters(a))
                    .any(|l| l.contains('L') || l.contains('S'));
            verdict(!mutates && lists, cmd, None)
        }
        "nft" => {
            let verb = first_positional(rest, &["-f", "--file", "-I", "--includepath"]);
            verdict(matches!(verb, Some("list")) && !has_flag(rest, &["-f", "--file"]), cmd, verb)
        }
        "ufw" => {
            let verb = first_positional(rest, &[]);
            verdict(matches!(verb, Some("status" | "version" | "show")), cmd, verb)
        }
        "firewall-cmd" => {
            let ok = !rest.is_empty()
                && rest.iter().all(|a| {
                    a.starts_with("--list")
                        || a.starts_with("--get")
                        || a.starts_with("--query")
                        || a.starts_with("--info")
                        || a.starts_with("--zone")
                        || matches!(*a, "--state" | "--version" | "-V" | "--permanent")
                });
            verdict(ok, cmd, None)
        }
        "smartctl" => {
            let mutates = has_flag(
                rest,
                &["-t", "--test", "-s", "--smart", "-o", "--offlineauto", "-S", "--saveauto", "-X", "--abort"],
            );
            verdict(!mutates, cmd, None)
        }
        "nvme" => {
            let verb = first_positional(rest, &[]);
            verdict(
                matches!(
                    verb,
                    None | Some(
                        "list" | "smart-log" | "id-ctrl" | "id-ns" | "error-log" | "list-subsys" | "fw-log"
                            | "list-ns" | "show-regs" | "get-feature" | "version" | "help"
                    )
                ),
                cmd,
                verb,
            )
        }
        "hdparm" => {
            let ok = rest.iter().filter(|a| a.starts_with('-')).all(|a| {
                short_letters(a).is_some_and(|l| !l.is_empty() && l.chars().all(|c| "IigCtT".contains(c)))
            });
            verdict(ok, cmd, None)
        }
        "mdadm" => verdict(
            has_flag(rest, &["--detail", "-D", "--examine", "-E", "--query", "-Q", "--detail-platform"]),
            cmd,
            None,
        ),
        "curl" => curl(rest),
        "find" => {
            const FIND_WRITE: &[&str] = &[
                "-delete", "-exec", "-execdir", "-ok", "-okdir", "-fprint", "-fprint0", "-fprintf", "-fls",
            ];
            match rest.iter().find(|a| FIND_WRITE.contains(*a)) {
                Some(action) => write(format!("find {action} acts on matched files")),
                None => read("find only lists files"),
            }
        }
        "sed" | "gsed" => {
            let in_place = has_flag(rest, &["--in-place"])
                || rest.iter().any(|a| a.starts_with("--in-place="))
                || has_short(rest, 'i');
            if in_place {
                write("sed -i edits files in place")
            } else {
                read("sed without -i only prints")
            }
        }
        "awk" | "gawk" | "mawk" | "nawk" => awk(cmd, rest),
        "tcpdump" | "tshark" => verdict(!has_flag(rest, &["-w"]), cmd, None),
        "sort" => verdict(!has_flag(rest, &["-o", "--output"]), cmd, None),
        "uniq" => verdict(positionals(rest, &["-f", "-s", "-w"]).len() < 2, cmd, None),
        "tar" => tar(rest),
        "unzip" => verdict(has_flag(rest, &["-l", "-v", "-t", "-Z", "-p"]), cmd, None),
        "gzip" => verdict(
            has_flag(rest, &["-l", "-t", "-c", "--list", "--test", "--stdout"]),
            cmd,
            None,
        ),
        "git" => git(rest),
        "hostname" => {
            let set = !positionals(rest, &["-F", "--file"]).is_empty() || has_flag(rest, &["-F", "--file", "-b", "--boot"]);
            verdict(!set, cmd, None)
        }
        "hostnamectl" | "timedatectl" | "localectl" | "loginctl" | "networkctl" | "resolvectl" => {
            let verb = first_positional(rest, &["-H", "--host", "-M", "--machine", "-p", "--property"]);
            let ok = match verb {
                None => true,
                Some(v) => {
                    matches!(v, "status" | "show" | "query" | "statistics" | "dns" | "domain" | "timesync-status")
                        || v.starts_with("list")
                        || v.starts_with("show-")
                }
            };
            verdict(ok, cmd, verb)
        }
        "date" => verdict(!has_flag(rest, &["-s", "--set"]), cmd, None),
        "dmesg" => {
            let clears = has_flag(
                rest,
                &["-c", "-C", "--clear", "--read-clear", "-D", "-E", "-n", "--console-level", "--console-off", "--console-on"],
            );
            verdict(!clears, cmd, None)
        }
        "crontab" => {
            if has_flag(rest, &["-e"]) {
                Some(CommandIntent::write(tags::PAGER, "crontab -e opens an editor"))
            } else {
                verdict(has_flag(rest, &["-l"]), cmd, None)
            }
        }
        "sysctl" => {
            let mutates = has_flag(rest, &["-w", "--write", "-p", "--load", "--system"])
                || rest.iter().any(|a| !a.starts_with('-') && a.contains('='));
            verdict(!mutates, cmd, None)
        }
        "mount" => verdict(
            positionals(rest, &["-t", "--types", "-O", "--test-opts"]).is_empty()
                && !has_flag(rest, &["-a", "--all", "-o", "--options"]),
            cmd,
            None,
        ),
        "swapon" => verdict(has_flag(rest, &["--show", "-s", "--summary"]), cmd, None),
        "fdisk" | "parted" | "cfdisk" => verdict(
            has_flag(rest, &["-l", "--list"]) || (cmd == "parted" && rest.iter().any(|a| *a == "print")),
            cmd,
            None,
        ),
        "ethtool" => {
            let mutates = has_flag(
                rest,
                &[
                    "-s", "-K", "-A", "-C", "-G", "-L", "-E", "-f", "-r", "-W", "-X", "-U", "-N", "-p",
                    "--change", "--offload", "--pause", "--coalesce", "--set-ring", "--set-channels",
                    "--change-eeprom", "--flash", "--reset", "--identify",
                ],
            ) || rest.iter().any(|a| a.starts_with("--set"));
            verdict(!mutates, cmd, None)
        }
        "ifconfig" => verdict(positionals(rest, &[]).len() < 2, cmd, None),
        "route" => {
            let verb = positionals(rest, &[])
                .into_iter()
                .find(|p| matches!(*p, "add" | "del" | "delete" | "flush"));
            verdict(verb.is_none(), cmd, verb)
        }
        "arp" => verdict(
            !has_flag(rest, &["-d", "-s", "-f", "--delete", "--set", "--file"]),
            cmd,
            None,
        ),
        "fuser" => verdict(!has_flag(rest, &["-k", "--kill"]) && !has_short(rest, 'k'), cmd, None),
        "kill" => verdict(has_flag(rest, &["-l", "-L", "--list", "-0"]), cmd, None),
        "hwclock" => verdict(
            !has_flag(rest, &["-w", "--systohc", "-s", "--hctosys", "--set", "--adjust", "-a"]),
            cmd,
            None,
        ),
        "journalctl" => verdict(
            !rest.iter().any(|a| {
                a.starts_with("--vacuum") || matches!(*a, "--rotate" | "--flush" | "--sync" | "--relinquish-var" | "--setup-keys")
            }),
            cmd,
            None,
        ),
        "openssl" => openssl(rest),
        "ipmitool" => {
            const IPMI_WRITE: &[&str] = &[
                "power", "reset", "raw", "clear", "bootdev", "set", "user", "activate", "deactivate",
                "bootparam", "policy", "identify",
            ];
            let verb = positionals(rest, &["-H", "-U", "-P", "-I", "-p", "-L", "-f"])
                .into_iter()
                .find(|p| IPMI_WRITE.contains(p));
            verdict(verb.is_none(), cmd, verb)
        }
        "virsh" => {
            let verb = first_positional(rest, &["-c", "--connect"]);
            verdict(
                matches!(
                    verb,
                    Some(
                        "list" | "dominfo" | "domstate" | "dumpxml" | "nodeinfo" | "net-list" | "pool-list"
                            | "vol-list" | "domblklist" | "domiflist" | "version" | "capabilities" | "hostname"
                            | "uri" | "domstats"
                    )
                ),
                cmd,
                verb,
            )
        }
        "wg" => {
            let verb = first_positional(rest, &[]);
            verdict(matches!(verb, None | Some("show" | "showconf")), cmd, verb)
        }
        "apt" | "apt-get" | "aptitude" => {
            let verb = first_positional(rest, &["-o", "-c", "-t"]);
            verdict(
                matches!(
                    verb,
                    Some(
                        "list" | "show" | "search" | "policy" | "depends" | "rdepends" | "changelog" | "showsrc"
                            | "madison" | "help"
                    )
                ),
                cmd,
                verb,
            )
        }
        "dpkg" => verdict(
            has_flag(
                rest,
                &[
                    "-l", "--list", "-L", "--listfiles", "-s", "--status", "-S", "--search", "-p", "--print-avail",
                    "--get-selections", "--audit", "-C", "--print-architecture", "--version",
                ],
            ),
            cmd,
            None,
        ),
        "rpm" => verdict(
            rest.iter().any(|a| {
                a.starts_with("-q") || a.starts_with("--query") || matches!(*a, "-V" | "--verify" | "--version")
            }),
            cmd,
            None,
        ),
        "yum" | "dnf" => {
            let pos = positionals(rest, &["-c", "--config", "--setopt", "--repo", "--enablerepo", "--disablerepo"]);
            let verb = pos.first().copied();
            let ok = match verb {
                Some("history") => matches!(pos.get(1), None | Some(&"list") | Some(&"info")),
                Some(v) => matches!(
                    v,
                    "list" | "info" | "search" | "check-update" | "repolist" | "provides" | "whatprovides"
                        | "deplist" | "repoquery" | "updateinfo"
                ),
                None => false,
            };
            verdict(ok, cmd, verb)
        }
        "apk" => {
            let verb = first_positional(rest, &[]);
            verdict(
                matches!(verb, Some("info" | "list" | "search" | "policy" | "stats" | "version" | "dot")),
                cmd,
                verb,
            )
        }
        "snap" => {
            let verb = first_positional(rest, &[]);
            verdict(
                matches!(verb, Some("list" | "info" | "find" | "services" | "version" | "changes" | "connections")),
                cmd,
                verb,
            )
        }
        "pip" | "pip3" => {
            let verb = first_positional(rest, &[]);
            let ok = matches!(verb, Some("list" | "show" | "freeze" | "check" | "search" | "help"))
                || (verb.is_none() && has_flag(rest, &["--version", "-V"]));
            verdict(ok, cmd, verb)
        }
        "npm" => {
            let verb = first_positional(rest, &[]);
            let ok = matches!(verb, Some("ls" | "list" | "view" | "info" | "outdated" | "search" | "help"))
                || (verb.is_none() && has_flag(rest, &["--version", "-v"]));
            verdict(ok, cmd, verb)
        }
        _ => None,
    }
}

fn docker(cmd: &str, rest: &[&str]) -> Option<CommandIntent> {
    const MANAGEMENT: &[&str] = &[
        "container", "image", "network", "volume", "system", "node", "service", "stack", "plugin",
        "context", "secret", "config", "swarm", "buildx", "builder", "manifest", "trust",
    ];
    const MANAGEMENT_READ: &[&str] = &[
        "ls", "list", "inspect", "logs", "ps", "top", "port", "stats", "history", "df", "info",
        "events", "diff", "services", "show",
    ];
    const DIRECT_READ: &[&str] = &[
        "ps", "logs", "inspect", "images", "stats", "info", "version", "top", "port", "diff", "history",
        "events", "search",
    ];
    let (verb, sub) = docker_verbs(rest);
    match verb {
        None => verdict(has_flag(rest, &["--version", "-v", "--help"]), cmd, None),
        Some("compose") => compose(cmd, sub),
        Some(v) if MANAGEMENT.contains(&v) => {
            let ok = sub.is_some_and(|s| MANAGEMENT_READ.contains(&s));
            let label = format!("{v} {}", sub.unwrap_or_default());
            verdict(ok, cmd, Some(label.trim_end()))
        }
        Some(v) => verdict(DIRECT_READ.contains(&v), cmd, Some(v)),
    }
}

fn compose(cmd: &str, verb: Option<&str>) -> Option<CommandIntent> {
    verdict(
        matches!(verb, Some("ps" | "logs" | "config" | "ls" | "images" | "top" | "version" | "port")),
        cmd,
        verb,
    )
}

fn kubectl(cmd: &str, rest: &[&str]) -> Option<CommandIntent> {
    let (verb, sub) = kubectl_verbs(rest);
    let ok = match verb {
        None => false,
        Some("config") => matches!(
            sub,
            Some("view" | "get-contexts" | "current-context" | "get-clusters" | "get-users")
        ),
        Some("rollout") => matches!(sub, Some("status" | "history")),
        Some("auth") => sub == Some("can-i"),
        Some(v) => matches!(
            v,
            "get" | "describe" | "logs" | "top" | "cluster-info" | "version" | "api-resources"
                | "api-versions" | "explain" | "events" | "diff"
        ),
    };
    verdict(ok, cmd, verb)
}

fn ceph(rest: &[&str]) -> Option<CommandIntent> {
    let pos = positionals(rest, &["-c", "--conf", "-n", "--name", "-k", "--keyring", "-f", "--format"]);
    let ok = match pos.first().copied() {
        None => true,
        Some("status" | "health" | "df" | "versions" | "version" | "report" | "quorum_status" | "-s") => true,
        Some("osd" | "pg" | "mon" | "mgr" | "fs" | "mds" | "auth") => match pos.get(1).copied() {
            Some("pool") => matches!(pos.get(2), Some(&"ls") | Some(&"get") | Some(&"stats")),
            Some(s) => matches!(
                s,
                "tree" | "df" | "stat" | "ls" | "dump" | "status" | "metadata" | "perf" | "get" | "versions"
                    | "blocked-by" | "list" | "services"
            ),
            None => false,
        },
        Some(_) => false,
    };
    verdict(ok, "ceph", pos.first().copied())
}

fn curl(rest: &[&str]) -> Option<CommandIntent> {
    const BODY_FLAGS: &[&str] = &[
        "-d", "--data", "--data-raw", "--data-binary", "--data-urlencode", "--data-ascii", "-F",
        "--form", "--form-string", "-T", "--upload-file", "--json", "-O", "--remote-name",
        "--remote-name-all",
    ];
    if let Some(method) = flag_value(rest, &["-X", "--request"])
        .or_else(|| rest.iter().find_map(|a| a.strip_prefix("-X").filter(|m| !m.is_empty())))
    {
        if !matches!(method.to_ascii_uppercase().as_str(), "GET" | "HEAD" | "OPTIONS") {
            return write(format!("curl -X {method} sends a mutating request"));
        }
    }
    if has_flag(rest, BODY_FLAGS) || rest.iter().any(|a| a.starts_with("-d") && a.len() > 2) {
        return write("curl uploads data or writes a remote file");
    }
    for flag in [&["-o", "--output"][..], &["-D", "--dump-header"], &["-c", "--cookie-jar"]] {
        if let Some(target) = flag_value(rest, flag) {
            if target != "-" && target != "/dev/null" {
                return write(format!("curl writes to {target}"));
            }
        }
    }
    read("curl performs a read-only request")
}

fn awk(cmd: &str, rest: &[&str]) -> Option<CommandIntent> {
    if rest.iter().any(|a| *a == "inplace") || has_flag(rest, &["-i", "--include"]) {
        return write(format!("{cmd} -i inplace edits files"));
    }
    let program = positionals(rest, &["-F", "-v", "-f", "--field-separator", "--assign", "--file"])
        .into_iter()
        .next()
        .unwrap_or_default();
    let runs_commands = program.contains("system(") || program.contains("| \"") || program.contains("|\"");
    let redirects = program
        .match_indices("print")
        .any(|(i, _)| program[i..].split([';', '}', '\n']).next().is_some_and(|stmt| stmt.contains('>')));
    if runs_commands || redirects {
        write(format!("{cmd} program runs commands or writes files"))
    } else {
        read(format!("{cmd} only transforms text"))
    }
}

fn tar(rest: &[&str]) -> Option<CommandIntent> {
    const LONG_WRITE: &[&str] = &[
        "--create", "--extract", "--get", "--append", "--update", "--delete", "--concatenate",
    ];
    let mode_letters = |a: &str| -> String {
        match short_letters(a) {
            Some(l) => l.to_string(),
            None if !a.starts_with('-') => a.chars().take_while(|c| c.is_ascii_alphabetic()).collect(),
            None => String::new(),
        }
    };
    let first = rest.first().map(|a| mode_letters(a)).unwrap_or_default();
    let clusters: Vec<String> = rest
        .iter()
        .filter_map(|a| short_letters(a).map(str::to_string))
        .chain(std::iter::once(first))
        .collect();
    let mutates = has_flag(rest, LONG_WRITE)
        || clusters.iter().any(|l| l.chars().any(|c| "cxruA".contains(c)));
    let lists = has_flag(rest, &["--list"]) || clusters.iter().any(|l| l.contains('t'));
    verdict(!mutates && lists, "tar", None)
}

fn git(rest: &[&str]) -> Option<CommandIntent> {
    let pos = positionals(rest, &["-C", "-c", "--git-dir", "--work-tree"]);
    let verb = pos.first().copied();
    let args = &pos[pos.len().min(1)..];
    let ok = match verb {
        None => true,
        Some("remote") => matches!(args.first(), None | Some(&"show") | Some(&"get-url")),
        Some("branch") => args.is_empty() && !has_flag(rest, &["-d", "-D", "-m", "-M", "--delete", "--move", "-c", "-C"]),
        Some("tag") => args.is_empty() || has_flag(rest, &["-l", "--list"]),
        Some("config") => rest.iter().any(|a| a.starts_with("--get") || matches!(*a, "--list" | "-l")),
        Some("stash") => matches!(args.first(), Some(&"list") | Some(&"show")),
        Some(v) => matches!(
            v,
            "status" | "log" | "diff" | "show" | "blame" | "rev-parse" | "describe" | "ls-files" | "ls-tree"
                | "ls-remote" | "shortlog" | "grep" | "reflog" | "cat-file" | "version" | "help" | "rev-list"
        ),
    };
    verdict(ok, "git", verb)
}

fn openssl(rest: &[&str]) -> Option<CommandIntent> {
    let verb = first_positional(rest, &[]);
    let generates = matches!(verb, Some("genrsa" | "genpkey" | "gendsa" | "ca" | "rand"))
        || has_flag(rest, &["-out", "-new", "-genkey", "-export", "-keyout"]);
    verdict(!generates, "openssl", verb)
}
