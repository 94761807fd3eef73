//! Inventory table declarations, one per collector output.

pub const HWINFO_TABLE: &str = "hwinfo";
pub const OSINFO_TABLE: &str = "osinfo";
pub const NETWORK_IFACE_TABLE: &str = "network_iface";
pub const NETWORK_PROTOCOL_TABLE: &str = "network_protocol";
pub const NETWORK_ADDRESS_TABLE: &str = "network_address";
pub const PORTS_TABLE: &str = "ports";
pub const PACKAGES_TABLE: &str = "packages";
pub const PROCESSES_TABLE: &str = "processes";
pub const HOTFIXES_TABLE: &str = "hotfixes";

const HWINFO_DDL: &str = "CREATE TABLE hwinfo (
    board_serial TEXT,
    cpu_name TEXT,
    cpu_cores INTEGER,
    cpu_mhz DOUBLE,
    ram_total BIGINT,
    ram_free BIGINT,
    ram_usage INTEGER,
    PRIMARY KEY (board_serial));";

const OSINFO_DDL: &str = "CREATE TABLE osinfo (
    os_name TEXT,
    os_version TEXT,
    os_build TEXT,
    os_major TEXT,
    os_minor TEXT,
    os_release TEXT,
    hostname TEXT,
    architecture TEXT,
    PRIMARY KEY (os_name));";

const NETWORK_IFACE_DDL: &str = "CREATE TABLE network_iface (
    name TEXT,
    adapter TEXT,
    type TEXT,
    state TEXT,
    mtu BIGINT,
    mac TEXT,
    tx_packets INTEGER,
    rx_packets INTEGER,
    PRIMARY KEY (name));";

const NETWORK_PROTOCOL_DDL: &str = "CREATE TABLE network_protocol (
    iface TEXT,
    type TEXT,
    gateway TEXT,
    dhcp TEXT,
    metric TEXT,
    PRIMARY KEY (iface, type));";

const NETWORK_ADDRESS_DDL: &str = "CREATE TABLE network_address (
    iface TEXT,
    proto TEXT,
    address TEXT,
    netmask TEXT,
    broadcast TEXT,
    PRIMARY KEY (iface, proto, address));";

const PORTS_DDL: &str = "CREATE TABLE ports (
    inode BIGINT,
    protocol TEXT,
    local_ip TEXT,
    local_port BIGINT,
    remote_ip TEXT,
    remote_port BIGINT,
    tx_queue BIGINT,
    rx_queue BIGINT,
    state TEXT,
    pid BIGINT,
    process TEXT,
    PRIMARY KEY (inode, protocol, local_ip, local_port));";

const PACKAGES_DDL: &str = "CREATE TABLE packages (
    name TEXT,
    version TEXT,
    architecture TEXT,
    format TEXT,
    location TEXT,
    vendor TEXT,
    install_time TEXT,
    size BIGINT,
    description TEXT,
    PRIMARY KEY (name, version, architecture, format, location));";

const PROCESSES_DDL: &str = "CREATE TABLE processes (
    pid TEXT,
    name TEXT,
    state TEXT,
    ppid BIGINT,
    utime BIGINT,
    stime BIGINT,
    cmd TEXT,
    argvs TEXT,
    euser TEXT,
    priority BIGINT,
    nice BIGINT,
    size BIGINT,
    vm_size BIGINT,
    resident BIGINT,
    start_time BIGINT,
    PRIMARY KEY (pid));";

const HOTFIXES_DDL: &str = "CREATE TABLE hotfixes (
    hotfix TEXT,
    PRIMARY KEY (hotfix));";

/// The full inventory schema handed to the delta engine at startup.
pub fn schema_ddl() -> String {
    [
        HWINFO_DDL,
        OSINFO_DDL,
        NETWORK_IFACE_DDL,
        NETWORK_PROTOCOL_DDL,
        NETWORK_ADDRESS_DDL,
        PORTS_DDL,
        PACKAGES_DDL,
        PROCESSES_DDL,
        HOTFIXES_DDL,
    ]
    .join("\n")
}

/// Event qualifier carried in published delta documents.
pub(crate) fn event_type(table: &str) -> String {
    format!("dbsync_{table}")
}
